//! Document class registry
//!
//! Classes feed the branching step: its task template is regenerated from the
//! enabled class set after every class mutation, and its output is mapped back
//! to a class with [`match_class_token`].

use crate::catalog::steps::{CatalogError, StepCatalog};
use crate::catalog::store::ConfigStore;
use crate::core::document_class::{is_valid_key, normalize_key, DocumentClass};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Longest run of output words tried as one class key
const MAX_KEY_WORDS: usize = 4;

/// Registry of document classes backed by the config store
pub struct DocumentClassRegistry {
    store: Arc<dyn ConfigStore>,
    steps: Arc<StepCatalog>,
    admin_lock: Mutex<()>,
}

impl DocumentClassRegistry {
    pub fn new(steps: Arc<StepCatalog>) -> Self {
        Self {
            store: steps.store().clone(),
            steps,
            admin_lock: Mutex::new(()),
        }
    }

    /// Enabled classes, sorted by key
    pub async fn get_enabled_classes(&self) -> Result<Vec<DocumentClass>, CatalogError> {
        let mut classes: Vec<_> = self
            .store
            .list_classes()
            .await?
            .into_iter()
            .filter(|c| c.enabled)
            .collect();
        classes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(classes)
    }

    /// Look up a class (enabled or not) by key; the key is normalized first
    pub async fn get_by_key(&self, key: &str) -> Result<Option<DocumentClass>, CatalogError> {
        let key = normalize_key(key);
        Ok(self
            .store
            .list_classes()
            .await?
            .into_iter()
            .find(|c| c.key == key))
    }

    /// Map a branching step's raw output to an enabled class
    pub async fn resolve_token(
        &self,
        output: &str,
        branching_field: Option<&str>,
    ) -> Result<Option<DocumentClass>, CatalogError> {
        let classes = self.get_enabled_classes().await?;
        Ok(match_class_token(output, branching_field, &classes).cloned())
    }

    /// Classification prompt for the current enabled set
    pub async fn classification_prompt(&self) -> Result<String, CatalogError> {
        Ok(build_classification_prompt(&self.get_enabled_classes().await?))
    }

    pub async fn create_class(&self, mut class: DocumentClass) -> Result<DocumentClass, CatalogError> {
        let _guard = self.admin_lock.lock().await;
        class.key = normalize_key(&class.key);
        if !is_valid_key(&class.key) {
            return Err(CatalogError::InvalidKey(class.key));
        }

        let existing = self.store.list_classes().await?;
        if let Some(dup) = existing
            .iter()
            .find(|c| c.id == class.id || c.key == class.key)
        {
            return Err(CatalogError::DuplicateClass(dup.key.clone()));
        }

        self.store.upsert_class(&class).await?;
        info!(class = %class.key, "Created document class");
        self.after_mutation().await;
        Ok(class)
    }

    pub async fn update_class(&self, mut class: DocumentClass) -> Result<DocumentClass, CatalogError> {
        let _guard = self.admin_lock.lock().await;
        let current = self
            .store
            .get_class(&class.id)
            .await?
            .ok_or_else(|| CatalogError::ClassNotFound(class.id.clone()))?;

        class.key = normalize_key(&class.key);
        if current.is_system && class.key != current.key {
            return Err(CatalogError::SystemClassProtected(current.key, "renamed"));
        }
        if !is_valid_key(&class.key) {
            return Err(CatalogError::InvalidKey(class.key));
        }
        if self
            .store
            .list_classes()
            .await?
            .iter()
            .any(|c| c.id != class.id && c.key == class.key)
        {
            return Err(CatalogError::DuplicateClass(class.key));
        }
        class.is_system = current.is_system;

        self.store.upsert_class(&class).await?;
        info!(class = %class.key, "Updated document class");
        self.after_mutation().await;
        Ok(class)
    }

    pub async fn set_class_enabled(
        &self,
        class_id: &str,
        enabled: bool,
    ) -> Result<DocumentClass, CatalogError> {
        let _guard = self.admin_lock.lock().await;
        let mut class = self
            .store
            .get_class(class_id)
            .await?
            .ok_or_else(|| CatalogError::ClassNotFound(class_id.to_string()))?;
        class.enabled = enabled;

        self.store.upsert_class(&class).await?;
        info!(class = %class.key, enabled, "Toggled document class");
        self.after_mutation().await;
        Ok(class)
    }

    pub async fn delete_class(&self, class_id: &str) -> Result<(), CatalogError> {
        let _guard = self.admin_lock.lock().await;
        let class = self
            .store
            .get_class(class_id)
            .await?
            .ok_or_else(|| CatalogError::ClassNotFound(class_id.to_string()))?;
        if class.is_system {
            return Err(CatalogError::SystemClassProtected(class.key, "deleted"));
        }

        let users: Vec<String> = self
            .store
            .list_steps()
            .await?
            .into_iter()
            .filter(|s| s.document_class_id.as_deref() == Some(class_id))
            .map(|s| s.id)
            .collect();
        if !users.is_empty() {
            return Err(CatalogError::ClassInUse {
                class: class.key,
                steps: users.join(", "),
            });
        }

        self.store.delete_class(class_id).await?;
        info!(class = %class.key, "Deleted document class");
        self.after_mutation().await;
        Ok(())
    }

    /// Rewrite the branching step's template from the enabled classes
    pub async fn regenerate_branching_prompt(&self) -> Result<(), CatalogError> {
        let branching = self
            .store
            .list_steps()
            .await?
            .into_iter()
            .find(|s| s.enabled && s.is_branching_step && s.is_universal());
        let Some(mut step) = branching else {
            debug!("No branching step to regenerate");
            return Ok(());
        };

        let prompt = self.classification_prompt().await?;
        if step.task_template == prompt {
            return Ok(());
        }
        step.task_template = prompt;
        self.steps.update_step(step).await
    }

    async fn after_mutation(&self) {
        if let Err(e) = self.regenerate_branching_prompt().await {
            warn!(error = %e, "Failed to regenerate classification prompt");
        }
    }
}

/// Classification prompt listing every class with its indicators.
/// Ends with the `{{ text }}` placeholder for the document.
pub fn build_classification_prompt(classes: &[DocumentClass]) -> String {
    let mut prompt = String::from(
        "Classify the following medical document into exactly one of these categories.\n\
         Answer with the category key only.\n\n",
    );

    for class in classes {
        prompt.push_str(&format!("- {}: {}", class.key, class.display_name));
        if let Some(ref description) = class.description {
            prompt.push_str(&format!(" ({})", description));
        }
        prompt.push('\n');
        if !class.strong_indicators.is_empty() {
            prompt.push_str(&format!(
                "  strong indicators: {}\n",
                class.strong_indicators.join(", ")
            ));
        }
        if !class.weak_indicators.is_empty() {
            prompt.push_str(&format!(
                "  weak indicators: {}\n",
                class.weak_indicators.join(", ")
            ));
        }
        for example in &class.examples {
            prompt.push_str(&format!("  example: {}\n", example));
        }
    }

    prompt.push_str("\nDocument:\n{{ text }}");
    prompt
}

/// Map a branching step's output to a class.
///
/// When `branching_field` is set and the output is a JSON object, only that
/// field is read. Matching ignores case and punctuation; multi-word keys match
/// their words separated by spaces or underscores. The whole output is tried
/// first, then each line on its own. Failing both, free text resolves to the
/// last key it mentions, so "not a LAB_REPORT, a DISCHARGE_LETTER" is a
/// discharge letter.
pub fn match_class_token<'a>(
    output: &str,
    branching_field: Option<&str>,
    classes: &'a [DocumentClass],
) -> Option<&'a DocumentClass> {
    let raw = branching_field
        .and_then(|field| extract_field(output, field))
        .unwrap_or_else(|| output.to_string());

    let find = |words: &[String]| {
        let candidate = words.join("_");
        classes.iter().find(|c| c.key == candidate)
    };

    let words = key_words(&raw);
    if words.is_empty() {
        return None;
    }
    if let Some(class) = find(&words[..]) {
        return Some(class);
    }
    if let Some(class) = raw
        .lines()
        .map(key_words)
        .filter(|line| !line.is_empty())
        .find_map(|line| find(&line[..]))
    {
        return Some(class);
    }

    let mut last = None;
    let mut start = 0;
    while start < words.len() {
        let longest = (start + MAX_KEY_WORDS).min(words.len());
        match (start + 1..=longest)
            .rev()
            .find_map(|end| find(&words[start..end]).map(|class| (class, end)))
        {
            Some((class, end)) => {
                last = Some(class);
                start = end;
            }
            None => start += 1,
        }
    }
    last
}

fn key_words(text: &str) -> Vec<String> {
    text.to_uppercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn extract_field(output: &str, field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(output.trim()).ok()?;
    match value.get(field)? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
