//! # Role Mapping
//!
//! Maps an authenticated identity to the roles it holds. The mapping file lists
//! the members of each role:
//!
//! ```yaml
//! admin:
//!   - alice
//! user:
//!   - alice
//!   - bob
//! auditor: carol   # a single member may be a plain string
//! retired:         # no members
//! ```
//!
//! [`RoleMapper`] keeps the inverted index (identity → roles) behind an
//! [`ArcSwap`], so readers never lock and never see a half-built mapping.
//! A missing or broken file yields an empty mapping: nobody gains a role,
//! nothing crashes. After every reload the registered listeners run; the
//! realm uses this to flush the token cache so that role changes apply from
//! the next request on.

use crate::settings::{scalar_to_string, RealmSettings, SettingsError};
use arc_swap::ArcSwap;
use notify::{
    Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher,
};
use serde::de::Error as _;
use serde_yaml::Value;
use std::collections::{BTreeSet, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// File name used when `files.role_mapping` is not set.
pub const DEFAULT_ROLE_MAPPING_FILE: &str = "oauth_role_mapping.yml";

/// Callback run after every reload attempt.
pub type ReloadListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Error)]
pub enum RoleMappingError {
    #[error("cannot read role mapping file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse role mapping file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Where the mapping file lives and how it is watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMappingSettings {
    pub path: PathBuf,
    /// `None` uses the platform's native file notifications
    pub poll_interval: Option<Duration>,
}

impl RoleMappingSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: None,
        }
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Reads `files.role_mapping` (relative to `path.conf`) and
    /// `files.role_mapping.poll-interval-in-millis`.
    pub fn from_settings(settings: &RealmSettings) -> Result<Self, SettingsError> {
        let config_dir = settings.config_dir();
        let path = match settings.get("files.role_mapping") {
            Some(file) => {
                let file = Path::new(file);
                if file.is_absolute() {
                    file.to_path_buf()
                } else {
                    config_dir.join(file)
                }
            }
            None => config_dir.join(DEFAULT_ROLE_MAPPING_FILE),
        };
        let poll_interval = settings
            .get_parsed::<u64>("files.role_mapping.poll-interval-in-millis")?
            .map(Duration::from_millis);
        Ok(Self {
            path,
            poll_interval,
        })
    }
}

/// Members of one role: a list, a single scalar or nothing. Identities are
/// often numeric user ids, so numbers and booleans are read as strings.
fn members(role: &str, value: Value) -> Result<Vec<String>, serde_yaml::Error> {
    let member = |value: &Value| {
        scalar_to_string(value).ok_or_else(|| {
            serde_yaml::Error::custom(format!("role `{role}`: members must be scalars"))
        })
    };
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => items.iter().map(member).collect(),
        other => member(&other).map(|m| vec![m]),
    }
}

/// Identity → roles index built from a role → members file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleMapping {
    by_identity: HashMap<String, BTreeSet<String>>,
}

impl RoleMapping {
    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let roles = match serde_yaml::from_str::<Value>(content)? {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(roles) => roles,
            _ => return Err(serde_yaml::Error::custom("role mapping must be a mapping")),
        };
        let mut by_identity: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (role, value) in roles {
            let role = scalar_to_string(&role)
                .ok_or_else(|| serde_yaml::Error::custom("role names must be scalars"))?;
            for member in members(&role, value)? {
                by_identity
                    .entry(member)
                    .or_default()
                    .insert(role.clone());
            }
        }
        Ok(Self { by_identity })
    }

    pub fn from_file(path: &Path) -> Result<Self, RoleMappingError> {
        let content = std::fs::read_to_string(path).map_err(|source| RoleMappingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content).map_err(|source| RoleMappingError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Roles of `identity`, empty when unknown.
    #[must_use]
    pub fn roles_for(&self, identity: &str) -> BTreeSet<String> {
        self.by_identity.get(identity).cloned().unwrap_or_default()
    }

    /// Number of identities holding at least one role.
    #[must_use]
    pub fn identities(&self) -> usize {
        self.by_identity.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }
}

/// Hot-reloadable role mapping.
pub struct RoleMapper {
    settings: RoleMappingSettings,
    mapping: ArcSwap<RoleMapping>,
    listeners: Mutex<Vec<ReloadListener>>,
}

impl RoleMapper {
    /// Load the mapping once. Use [`RoleMapper::watch`] to follow changes.
    pub fn new(settings: RoleMappingSettings) -> Self {
        let mapping = load_or_empty(&settings.path);
        Self {
            settings,
            mapping: ArcSwap::from_pointee(mapping),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn from_settings(settings: &RealmSettings) -> Result<Self, SettingsError> {
        Ok(Self::new(RoleMappingSettings::from_settings(settings)?))
    }

    /// Register a callback run after every reload, successful or not.
    pub fn add_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.settings.path
    }

    /// Roles held by `user_id`. Scopes are not used for role resolution.
    #[must_use]
    pub fn roles_for(&self, user_id: &str, _scopes: &BTreeSet<String>) -> BTreeSet<String> {
        self.mapping.load().roles_for(user_id)
    }

    /// Current snapshot.
    #[must_use]
    pub fn mapping(&self) -> Arc<RoleMapping> {
        self.mapping.load_full()
    }

    /// Re-read the file, swap the mapping in and notify the listeners.
    ///
    /// On failure the mapping is already replaced by an empty one when this
    /// returns; the error is only informational.
    pub fn reload(&self) -> Result<(), RoleMappingError> {
        let loaded = RoleMapping::from_file(&self.settings.path);
        let result = match loaded {
            Ok(mapping) => {
                info!(
                    path = %self.settings.path.display(),
                    identities = mapping.identities(),
                    "role mapping reloaded"
                );
                self.mapping.store(Arc::new(mapping));
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "role mapping reload failed, falling back to an empty mapping");
                self.mapping.store(Arc::new(RoleMapping::default()));
                Err(e)
            }
        };

        // Clone out so a listener may register another listener.
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener();
        }
        result
    }

    /// Follow changes to the mapping file until the returned watcher drops.
    ///
    /// The parent directory is watched, so the file may be created, replaced
    /// or deleted after startup. The directory itself must exist.
    pub fn watch(self: &Arc<Self>) -> notify::Result<RoleMappingWatcher> {
        let directory = match self.settings.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self
            .settings
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();

        let mapper = Arc::clone(self);
        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if touches_file(&event, &file_name) {
                    debug!(kind = ?event.kind, "role mapping file changed");
                    // Failures are logged by reload().
                    mapper.reload().ok();
                }
            }
            Err(e) => warn!(error = %e, "role mapping watch error"),
        };

        let mut backend = match self.settings.poll_interval {
            Some(interval) => Backend::Poll(PollWatcher::new(
                handler,
                Config::default().with_poll_interval(interval),
            )?),
            None => Backend::Native(RecommendedWatcher::new(handler, Config::default())?),
        };
        backend.watch(&directory)?;
        info!(
            directory = %directory.display(),
            polling = self.settings.poll_interval.is_some(),
            "watching role mapping file"
        );
        Ok(RoleMappingWatcher {
            _backend: backend,
            directory,
        })
    }
}

impl std::fmt::Debug for RoleMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleMapper")
            .field("settings", &self.settings)
            .field("identities", &self.mapping.load().identities())
            .finish()
    }
}

enum Backend {
    Native(RecommendedWatcher),
    Poll(PollWatcher),
}

impl Backend {
    fn watch(&mut self, directory: &Path) -> notify::Result<()> {
        match self {
            Backend::Native(w) => w.watch(directory, RecursiveMode::NonRecursive),
            Backend::Poll(w) => w.watch(directory, RecursiveMode::NonRecursive),
        }
    }
}

/// Keeps the role mapping file watched while alive.
pub struct RoleMappingWatcher {
    _backend: Backend,
    directory: PathBuf,
}

impl RoleMappingWatcher {
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

fn touches_file(event: &Event, file_name: &OsString) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|path| path.file_name() == Some(file_name.as_os_str()))
}

fn load_or_empty(path: &Path) -> RoleMapping {
    match RoleMapping::from_file(path) {
        Ok(mapping) => {
            debug!(path = %path.display(), identities = mapping.identities(), "role mapping loaded");
            mapping
        }
        Err(e) => {
            error!(error = %e, "no usable role mapping, no identity holds any role");
            RoleMapping::default()
        }
    }
}
