//! HTML views served by the development server itself.

pub mod views;
