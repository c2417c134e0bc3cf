pub mod acquisition;
pub mod image_pipeline;
pub mod logger;
