// src/engine/mod.rs

pub mod badges;
pub mod generation;
pub mod profile;
pub mod session;
pub mod similarity;
