// src/utils/mod.rs

pub mod calendar;
pub mod vector;
