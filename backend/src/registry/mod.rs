//! Template registry and pipeline collaborators.
//!
//! Stores reusable message templates on disk as one JSON file per
//! template, and hosts the small collaborator seams the pipeline
//! snapshots before a run:
//!
//! - [`TemplateRegistry`] - file-backed template store
//! - [`PermissionStore`] / [`StaticPermissions`] - caller capability lookups
//! - [`FixedUrlShortener`] - deterministic [`UrlShortener`] for dev and tests
//! - [`load_tag_defaults`] - preview stand-ins from a JSON file

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::error::{RegistryError, RegistryResult, RenderResult};
use crate::models::CallerPermissions;
use crate::template::{TagDefaultTable, Template, UrlShortener};

/// Directory where templates are stored (relative to current dir).
const DEFAULT_REGISTRY_DIR: &str = ".smsbatch/templates";

/// Environment variable overriding the registry directory.
const REGISTRY_DIR_ENV: &str = "SMSBATCH_TEMPLATE_DIR";

// =============================================================================
// Stored Templates
// =============================================================================

/// A stored template with registry metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTemplate {
    /// The template itself.
    pub template: Template,
    /// Creation timestamp.
    pub created_at: String,
    /// Last body edit, if any.
    pub updated_at: Option<String>,
    /// Number of batch submits that used this template.
    pub use_count: u32,
}

/// File-backed registry of message templates.
pub struct TemplateRegistry {
    /// Directory where templates are stored.
    registry_dir: PathBuf,
    /// Loaded templates (id -> stored template).
    templates: HashMap<String, StoredTemplate>,
}

impl TemplateRegistry {
    /// Open the default registry, honoring `SMSBATCH_TEMPLATE_DIR`.
    pub fn new() -> Self {
        let dir = std::env::var(REGISTRY_DIR_ENV)
            .unwrap_or_else(|_| DEFAULT_REGISTRY_DIR.to_string());
        Self::with_dir(dir)
    }

    /// Open a registry over a custom directory.
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        let registry_dir = PathBuf::from(dir.as_ref());
        let mut registry = Self { registry_dir, templates: HashMap::new() };
        registry.load_all();
        registry
    }

    /// Load all templates from the registry directory.
    ///
    /// Unreadable or invalid files are skipped; a broken entry must not
    /// take the rest of the registry down with it.
    fn load_all(&mut self) {
        let Ok(entries) = fs::read_dir(&self.registry_dir) else {
            return;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            if let Some(stored) = Self::read_entry(&path) {
                self.templates.insert(stored.template.id.clone(), stored);
            }
        }
    }

    fn read_entry(path: &Path) -> Option<StoredTemplate> {
        let content = fs::read_to_string(path).ok()?;
        let stored: StoredTemplate = serde_json::from_str(&content).ok()?;
        stored.template.validate().ok()?;
        Some(stored)
    }

    /// Directory backing this registry.
    pub fn dir(&self) -> &Path {
        &self.registry_dir
    }

    /// All stored templates.
    pub fn list(&self) -> Vec<&StoredTemplate> {
        self.templates.values().collect()
    }

    /// Stored template by id.
    pub fn get(&self, id: &str) -> Option<&StoredTemplate> {
        self.templates.get(id)
    }

    /// Template by id, cloned for a batch run's snapshot.
    pub fn get_template(&self, id: &str) -> RegistryResult<Template> {
        self.templates
            .get(id)
            .map(|stored| stored.template.clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Save a template, assigning an id from its name when empty.
    ///
    /// The body is validated first; a body that cannot render must not
    /// reach disk.
    pub fn save(&mut self, mut template: Template) -> RegistryResult<String> {
        template.validate()?;
        fs::create_dir_all(&self.registry_dir)?;

        if template.id.is_empty() {
            template.id = self.generate_id(&template.name);
        }
        let id = template.id.clone();
        let stored = StoredTemplate {
            template,
            created_at: chrono::Utc::now().to_rfc3339(),
            updated_at: None,
            use_count: 0,
        };

        self.persist(&stored)?;
        self.templates.insert(id.clone(), stored);
        Ok(id)
    }

    /// Import a template from a JSON file.
    ///
    /// The file may omit `id` and `name`; the file stem fills in a
    /// missing name.
    pub fn import(&mut self, path: &Path, name: Option<&str>) -> RegistryResult<String> {
        let content = fs::read_to_string(path)?;
        let mut template = Template::from_json(&content)?;

        if template.name.is_empty() {
            template.name = name
                .map(str::to_string)
                .or_else(|| {
                    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
                })
                .unwrap_or_else(|| "imported".to_string());
        } else if let Some(name) = name {
            template.name = name.to_string();
        }

        self.save(template)
    }

    /// Replace a template's body, optionally normalizing its URL tags.
    pub fn update_body(&mut self, id: &str, body: String, normalize: bool) -> RegistryResult<()> {
        crate::template::tags::validate_body(&body)?;
        let stored = self
            .templates
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        stored.template.body = if normalize {
            crate::template::tags::normalize_url_tags(&body)
        } else {
            body
        };
        stored.updated_at = Some(chrono::Utc::now().to_rfc3339());
        let snapshot = stored.clone();
        self.persist(&snapshot)
    }

    /// Bind an original URL to one of a template's slots.
    pub fn set_url_slot(&mut self, id: &str, slot: u8, url: String) -> RegistryResult<()> {
        let stored = self
            .templates
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        stored.template = stored.template.clone().with_url_slot(slot, url);
        stored.updated_at = Some(chrono::Utc::now().to_rfc3339());
        let snapshot = stored.clone();
        self.persist(&snapshot)
    }

    /// Record one batch submit against a template. Best-effort persist;
    /// a failed stat write never blocks a submit.
    pub fn touch(&mut self, id: &str) {
        if let Some(stored) = self.templates.get_mut(id) {
            stored.use_count += 1;
            let path = self.registry_dir.join(format!("{}.json", id));
            if let Ok(content) = serde_json::to_string_pretty(stored) {
                let _ = fs::write(&path, content);
            }
        }
    }

    /// Delete a template from the registry.
    pub fn delete(&mut self, id: &str) -> RegistryResult<()> {
        if self.templates.remove(id).is_some() {
            let path = self.registry_dir.join(format!("{}.json", id));
            fs::remove_file(&path)?;
            Ok(())
        } else {
            Err(RegistryError::NotFound(id.to_string()))
        }
    }

    fn persist(&self, stored: &StoredTemplate) -> RegistryResult<()> {
        let path = self.registry_dir.join(format!("{}.json", stored.template.id));
        let content = serde_json::to_string_pretty(stored)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Generate a unique id from a name.
    fn generate_id(&self, name: &str) -> String {
        let lowered = name.to_lowercase();
        let slug = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        format!("{}-{}", slug, chrono::Utc::now().timestamp_millis())
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tag Defaults
// =============================================================================

/// Load preview tag defaults from a JSON file.
pub fn load_tag_defaults(path: &Path) -> RegistryResult<TagDefaultTable> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

// =============================================================================
// Permissions
// =============================================================================

/// Capabilities a caller can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// May address international phone numbers.
    InternationalSms,
}

/// Account-level capability lookups, keyed by subject id.
pub trait PermissionStore {
    /// Whether `subject_id` holds `permission`.
    fn has_permission(&self, subject_id: &str, permission: Permission) -> bool;
}

/// In-memory permission store, configured up front.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    international: HashSet<String>,
}

impl StaticPermissions {
    /// Empty store: nobody holds anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `SMSBATCH_INTL_SUBJECTS`, a comma-separated subject list.
    pub fn from_env() -> Self {
        let mut store = Self::new();
        if let Ok(raw) = std::env::var("SMSBATCH_INTL_SUBJECTS") {
            for subject in raw.split(',') {
                let subject = subject.trim();
                if !subject.is_empty() {
                    store.allow_international(subject);
                }
            }
        }
        store
    }

    /// Grant international sending to `subject_id`.
    pub fn allow_international(&mut self, subject_id: &str) {
        self.international.insert(subject_id.to_string());
    }
}

impl PermissionStore for StaticPermissions {
    fn has_permission(&self, subject_id: &str, permission: Permission) -> bool {
        match permission {
            Permission::InternationalSms => self.international.contains(subject_id),
        }
    }
}

/// Snapshot a caller's permissions for the duration of one run.
pub fn permissions_for(store: &dyn PermissionStore, subject_id: &str) -> CallerPermissions {
    CallerPermissions {
        international_sms: store.has_permission(subject_id, Permission::InternationalSms),
    }
}

// =============================================================================
// URL Shortening
// =============================================================================

/// Deterministic [`UrlShortener`] for development and tests: the code
/// is a hash of the original URL, so re-runs produce identical links.
#[derive(Debug, Clone)]
pub struct FixedUrlShortener {
    base: String,
}

impl FixedUrlShortener {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for FixedUrlShortener {
    fn default() -> Self {
        Self::new("https://sms.cx")
    }
}

impl UrlShortener for FixedUrlShortener {
    fn shorten(&self, _slot: u8, original_url: &str) -> RenderResult<String> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        original_url.hash(&mut hasher);
        Ok(format!("{}/{:08x}", self.base, hasher.finish() as u32))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sale_template() -> Template {
        Template::new("", "Spring sale", "Hi {info1}, see {URL}")
            .unwrap()
            .with_url_slot(1, "https://example.com/sale")
    }

    #[test]
    fn test_save_assigns_id_from_name() {
        let dir = tempdir().unwrap();
        let mut registry = TemplateRegistry::with_dir(dir.path());
        let id = registry.save(sale_template()).unwrap();
        assert!(id.starts_with("spring-sale-"));
        assert_eq!(registry.get(&id).unwrap().template.name, "Spring sale");
    }

    #[test]
    fn test_saved_template_survives_reload() {
        let dir = tempdir().unwrap();
        let id = {
            let mut registry = TemplateRegistry::with_dir(dir.path());
            registry.save(sale_template()).unwrap()
        };

        let reloaded = TemplateRegistry::with_dir(dir.path());
        let template = reloaded.get_template(&id).unwrap();
        assert_eq!(template.body, "Hi {info1}, see {URL}");
        assert_eq!(template.url_slot(1), Some("https://example.com/sale"));
    }

    #[test]
    fn test_save_rejects_invalid_body() {
        let dir = tempdir().unwrap();
        let mut registry = TemplateRegistry::with_dir(dir.path());
        let mut template = sale_template();
        template.body = "see {URL7}".into();
        assert!(matches!(
            registry.save(template),
            Err(RegistryError::InvalidTemplate(_))
        ));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_get_template_not_found() {
        let registry = TemplateRegistry::with_dir(tempdir().unwrap().path());
        assert!(matches!(
            registry.get_template("nope"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_removes_file_and_entry() {
        let dir = tempdir().unwrap();
        let mut registry = TemplateRegistry::with_dir(dir.path());
        let id = registry.save(sale_template()).unwrap();
        registry.delete(&id).unwrap();
        assert!(registry.get(&id).is_none());
        assert!(matches!(registry.delete(&id), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_update_body_with_normalization() {
        let dir = tempdir().unwrap();
        let mut registry = TemplateRegistry::with_dir(dir.path());
        let id = registry.save(sale_template()).unwrap();
        registry.update_body(&id, "{URL3} now {URL}".into(), true).unwrap();
        let stored = registry.get(&id).unwrap();
        assert_eq!(stored.template.body, "{URL1} now {URL2}");
        assert!(stored.updated_at.is_some());
    }

    #[test]
    fn test_set_url_slot_persists_binding() {
        let dir = tempdir().unwrap();
        let mut registry = TemplateRegistry::with_dir(dir.path());
        let id = registry.save(sale_template()).unwrap();
        registry.set_url_slot(&id, 2, "https://example.com/two".into()).unwrap();

        let reloaded = TemplateRegistry::with_dir(dir.path());
        let template = reloaded.get_template(&id).unwrap();
        assert_eq!(template.url_slot(2), Some("https://example.com/two"));
        // The original slot 1 binding is untouched.
        assert_eq!(template.url_slot(1), Some("https://example.com/sale"));
    }

    #[test]
    fn test_touch_bumps_use_count() {
        let dir = tempdir().unwrap();
        let mut registry = TemplateRegistry::with_dir(dir.path());
        let id = registry.save(sale_template()).unwrap();
        registry.touch(&id);
        registry.touch(&id);
        assert_eq!(registry.get(&id).unwrap().use_count, 2);
    }

    #[test]
    fn test_import_from_json_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spring.json");
        fs::write(&path, r#"{"body": "See {URL} today", "url_slots": [null, null, null, null]}"#)
            .unwrap();

        let store_dir = tempdir().unwrap();
        let mut registry = TemplateRegistry::with_dir(store_dir.path());
        let id = registry.import(&path, None).unwrap();
        let stored = registry.get(&id).unwrap();
        assert_eq!(stored.template.name, "spring");
        assert_eq!(stored.template.body, "See {URL} today");
    }

    #[test]
    fn test_static_permissions() {
        let mut store = StaticPermissions::new();
        assert!(!store.has_permission("tenant-1", Permission::InternationalSms));
        store.allow_international("tenant-1");
        assert!(store.has_permission("tenant-1", Permission::InternationalSms));

        let perms = permissions_for(&store, "tenant-1");
        assert!(perms.international_sms);
        let perms = permissions_for(&store, "tenant-2");
        assert!(!perms.international_sms);
    }

    #[test]
    fn test_fixed_shortener_is_deterministic() {
        let shortener = FixedUrlShortener::default();
        let a = shortener.shorten(1, "https://example.com/a").unwrap();
        let b = shortener.shorten(1, "https://example.com/a").unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("https://sms.cx/"));
        let c = shortener.shorten(1, "https://example.com/c").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_load_tag_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("defaults.json");
        fs::write(&path, r#"{"info": ["Customer", "Shop", "Date", "Code"]}"#).unwrap();
        let table = load_tag_defaults(&path).unwrap();
        assert_eq!(table.info_default(1), "Customer");
        assert_eq!(table.info_default(4), "Code");
    }
}
