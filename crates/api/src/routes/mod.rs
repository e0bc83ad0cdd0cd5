//! Route handlers

pub mod sensors;
