pub mod build;
pub mod estimate;
pub mod list_specs;
