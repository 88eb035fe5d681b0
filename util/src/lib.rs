
extern crate ndarray as nd;
extern crate na_core;
extern crate na_inversion as na_inv;

pub mod data;
pub mod progress;
