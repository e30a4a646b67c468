pub mod environment;
pub mod paths;

pub use environment::{CONFIG_ENV_VAR, default_config_path};
pub use paths::{
    attachment_url, format_path_with_tilde, relative_slash_path, resolve_within_root,
    validate_file_size,
};
