pub const PACKAGE_FILE_NAME: &str = "app.json";
pub const STATUS_FILE_NAME: &str = "greatpush.json";
pub const DOWNLOAD_FILE_NAME: &str = "download.zip";
pub const UNZIPPED_FOLDER_NAME: &str = "unzipped";
pub const DIFF_MANIFEST_FILE_NAME: &str = "hotgreatpush.json";
pub const STORAGE_FOLDER_NAME: &str = "GreatPush";

pub const PENDING_UPDATE_KEY: &str = "GREAT_PUSH_PENDING_UPDATE";
pub const FAILED_UPDATES_KEY: &str = "GREAT_PUSH_FAILED_UPDATES";
pub const CLIENT_UNIQUE_ID_KEY: &str = "GREAT_PUSH_CLIENT_ID";

pub const DEFAULT_BUNDLE_FILE_NAME: &str = "index.bundle";
pub const DEFAULT_SERVER_URL: &str = "https://greatpush.azurewebsites.net/";

/// Package directories are named by this many leading characters of the hash.
pub const SHORT_HASH_LEN: usize = 8;

pub const DOWNLOAD_BUFFER_SIZE: usize = 256 * 1024;
