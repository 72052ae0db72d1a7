//! In-memory template service.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::Address;
use anyhow::Result;
use async_trait::async_trait;

use super::{ShapeRule, TemplateLibrary, TemplateMatch};
use crate::config::ContractOverrides;
use crate::source::ContractSources;

/// A named template: the overrides it contributes and the rules recognizing it.
#[derive(Clone)]
pub struct TemplateDefinition {
    pub name: String,
    pub overrides: ContractOverrides,
    rules: Vec<Arc<dyn ShapeRule>>,
}

impl TemplateDefinition {
    pub fn new(name: impl Into<String>, overrides: ContractOverrides) -> Self {
        Self {
            name: name.into(),
            overrides,
            rules: Vec::new(),
        }
    }

    /// Adds a shape rule. A template without rules is only ever applied
    /// explicitly or by suggestion, never by shape.
    pub fn with_rule(mut self, rule: impl ShapeRule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn ShapeRule> {
        self.rules.iter().map(|rule| rule.as_ref())
    }
}

impl std::fmt::Debug for TemplateDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateDefinition")
            .field("name", &self.name)
            .field("overrides", &self.overrides)
            .field(
                "rules",
                &self.rules.iter().map(|r| r.name().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Template library backed by a map of [`TemplateDefinition`]s.
#[derive(Debug, Default, Clone)]
pub struct TemplateService {
    templates: BTreeMap<String, TemplateDefinition>,
}

impl TemplateService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a template, replacing any previous one with the same name.
    pub fn with_template(mut self, template: TemplateDefinition) -> Self {
        tracing::debug!(
            target: "discovery::templates",
            template = %template.name,
            rules = template.rules.len(),
            "Registered template"
        );
        self.templates.insert(template.name.clone(), template);
        self
    }

    pub fn get(&self, name: &str) -> Option<&TemplateDefinition> {
        self.templates.get(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    fn first_matching_rule(
        &self,
        template: &TemplateDefinition,
        address: Address,
        sources: &ContractSources,
    ) -> Option<String> {
        for rule in template.rules() {
            match rule.matches(address, sources) {
                Ok(true) => return Some(rule.name().to_string()),
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(
                        target: "discovery::templates",
                        template = %template.name,
                        rule = rule.name(),
                        address = %address,
                        error = %e,
                        "Shape rule failed"
                    );
                }
            }
        }
        None
    }
}

#[async_trait]
impl TemplateLibrary for TemplateService {
    async fn match_by_shape(
        &self,
        address: Address,
        sources: &ContractSources,
    ) -> Result<BTreeMap<String, TemplateMatch>> {
        let matches: BTreeMap<String, TemplateMatch> = self
            .templates
            .values()
            .filter_map(|template| {
                self.first_matching_rule(template, address, sources)
                    .map(|rule| {
                        (
                            template.name.clone(),
                            TemplateMatch {
                                template: template.name.clone(),
                                rule,
                            },
                        )
                    })
            })
            .collect();

        if !matches.is_empty() {
            tracing::trace!(
                target: "discovery::templates",
                address = %address,
                matched = ?matches.keys().collect::<Vec<_>>(),
                "Shape matched"
            );
        }

        Ok(matches)
    }

    fn apply_template(
        &self,
        overrides: &ContractOverrides,
        template: &str,
    ) -> Result<ContractOverrides> {
        let definition = self
            .templates
            .get(template)
            .ok_or_else(|| anyhow::anyhow!("Unknown template: {}", template))?;
        Ok(overrides.merged_over(&definition.overrides))
    }
}
