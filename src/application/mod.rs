pub mod bridge;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod livereload;
pub mod request;
pub mod routing;
