pub mod mesh;
pub mod raster;
pub mod task;
pub mod vector;
