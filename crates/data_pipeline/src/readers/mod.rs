pub mod list_file;

pub use list_file::{fields, read_sample_ids, InputLoader, ListFileDataset, NpyLoader};
