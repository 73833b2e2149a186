/// File extension used for every table document.
pub const TABLE_FILE_EXTENSION: &str = "yaml";
