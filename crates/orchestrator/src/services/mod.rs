pub mod connections;
pub mod devices;
pub mod jobs;

#[cfg(test)]
pub(crate) mod test_support;
