//! Build metadata and the build-provider contract.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::BuildRetrievalError;

/// Identifies the software image one invocation tests.
///
/// Created by a [`BuildProvider`], tagged with the device serial during
/// preparation, passed by reference through the listener chain, and
/// released through the provider exactly once at invocation end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    build_id: String,
    build_name: String,
    device_serial: Option<String>,
    attributes: BTreeMap<String, String>,
    fetched_at: DateTime<Utc>,
}

impl BuildInfo {
    /// Create a build with the given id and flavor name.
    pub fn new(build_id: impl Into<String>, build_name: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            build_name: build_name.into(),
            device_serial: None,
            attributes: BTreeMap::new(),
            fetched_at: Utc::now(),
        }
    }

    /// Build identifier (version, change number).
    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    /// Build flavor name.
    pub fn build_name(&self) -> &str {
        &self.build_name
    }

    /// Serial of the device this build was assigned to, once prepared.
    pub fn device_serial(&self) -> Option<&str> {
        self.device_serial.as_deref()
    }

    /// Tag the build with the device it is being tested on.
    pub fn set_device_serial(&mut self, serial: impl Into<String>) {
        self.device_serial = Some(serial.into());
    }

    /// Attach an arbitrary attribute.
    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Look up an attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// When the provider handed out this build.
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.build_name, self.build_id)
    }
}

/// Delivers builds to test and owns their release.
#[async_trait]
pub trait BuildProvider: Send + Sync {
    /// Fetch the next build to test. `Ok(None)` means there is currently
    /// nothing to test, which is not an error.
    async fn get_build(&self) -> Result<Option<BuildInfo>, BuildRetrievalError>;

    /// The invocation ended without reaching a verdict on this build; it
    /// should be offered again later.
    async fn build_not_tested(&self, build: &BuildInfo);

    /// Release all resources associated with the build. Called exactly once
    /// per delivered build, regardless of invocation outcome.
    async fn clean_up(&self, build: BuildInfo);
}

/// Wraps an already-fetched build for a resumed invocation.
///
/// When a device is lost mid-run, the resume configuration must test the
/// same build on a replacement device. This provider hands the cloned build
/// out once and releases nothing: the original invocation still owns the
/// real release of its build handle.
pub struct ExistingBuildProvider {
    build: Mutex<Option<BuildInfo>>,
}

impl ExistingBuildProvider {
    /// Wrap the given build.
    pub fn new(build: BuildInfo) -> Self {
        Self {
            build: Mutex::new(Some(build)),
        }
    }
}

#[async_trait]
impl BuildProvider for ExistingBuildProvider {
    async fn get_build(&self) -> Result<Option<BuildInfo>, BuildRetrievalError> {
        Ok(self.build.lock().expect("build lock poisoned").take())
    }

    async fn build_not_tested(&self, _build: &BuildInfo) {}

    async fn clean_up(&self, _build: BuildInfo) {}
}
