// src/models/mod.rs

pub mod achievement;
pub mod generation;
pub mod profile;
pub mod session;
pub mod similarity;
