pub mod dispersion;
pub mod fdr;
pub mod normalization;
pub mod scoring;
pub mod stats;
