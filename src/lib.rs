//! labelscan - product attribute extraction from label images.
//!
//! Downloads the images referenced by a table, reads their text with OCR,
//! tags named entities, and pulls unit-bearing measurements (weights,
//! volumes, dimensions, voltages, wattages) into a results table.

pub mod cli;
pub mod config;
pub mod dataset;
pub mod ocr;
pub mod services;
