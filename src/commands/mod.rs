pub mod authors;
pub mod migrate;
pub mod preview;

use crate::config::{Config, TargetMethod};
use crate::dest::Destination;
use crate::dest::api::GitlabApi;
use crate::dest::direct::DirectStore;
use crate::error::{MigrateError, Result};
use crate::source::rpc::TracRpc;

pub fn open_source(config: &Config) -> TracRpc {
    let source = &config.source;
    TracRpc::new(
        source.url.clone(),
        source.username.as_deref(),
        source.password.as_deref(),
    )
}

pub fn open_destination(config: &Config) -> Result<Box<dyn Destination>> {
    match &config.target.method {
        TargetMethod::Api { url, access_token } => {
            Ok(Box::new(GitlabApi::new(url, access_token.clone())))
        }
        TargetMethod::Direct { db_path } => {
            let uploads = config
                .uploads_dir()
                .ok_or_else(|| MigrateError::Config("direct target has no uploads directory".into()))?;
            Ok(Box::new(DirectStore::open(db_path, &uploads)?))
        }
    }
}
