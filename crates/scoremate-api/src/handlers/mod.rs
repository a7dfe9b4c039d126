#[cfg(feature = "storage-local")]
pub mod local_files;
pub mod quota;
pub mod scores;
pub mod uploads;
