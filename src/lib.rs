// src/lib.rs

pub mod config;
pub mod coupling;
pub mod density;
pub mod error;
pub mod fft3;
pub mod geometry;
pub mod mesh;
pub mod noise;
pub mod noise_grid;
pub mod region;
pub mod transfer;
