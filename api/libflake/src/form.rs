//! The configuration form: a rendered control tree for either a blank template or an existing host,
//! plus the state of the last submission.

use formschema::{
    reconstruct, render_schema, Control, Schema, SubmittedForm, NODES_ROOT, SCHEMA_ROOT,
};
use serde_json::Value;
use snafu::{ensure, ResultExt};

use crate::backend::{Artifact, Backend};
use crate::error::{self, Result};
use crate::status::config_hostname;

pub const NEW_TEMPLATE_LABEL: &str = "New node template";

/// Which document the form starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    /// Schema defaults.
    New,
    /// The configuration of the loaded host at this index.
    Host(usize),
}

#[derive(Debug)]
pub struct ConfigurationForm {
    schema: Schema,
    nodes: Vec<Value>,
    template: Template,
    controls: Control,
    artifacts: Vec<Artifact>,
    error: Option<String>,
    loading: bool,
}

impl ConfigurationForm {
    pub fn new(schema: Schema, nodes: Vec<Value>) -> Self {
        let controls = render_template(&schema, SCHEMA_ROOT, None);
        Self {
            schema,
            nodes,
            template: Template::New,
            controls,
            artifacts: Vec::new(),
            error: None,
            loading: false,
        }
    }

    /// Labels for the template picker, in the order `Template::New`, `Template::Host(0)`, ...
    pub fn template_labels(&self) -> Vec<String> {
        std::iter::once(NEW_TEMPLATE_LABEL.to_string())
            .chain(self.nodes.iter().enumerate().map(|(i, node)| {
                config_hostname(node)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("host {}", i))
            }))
            .collect()
    }

    pub fn template(&self) -> Template {
        self.template
    }

    /// Re-renders the form from the chosen template, discarding any edits.
    pub fn select_template(&mut self, template: Template) -> Result<()> {
        self.controls = match template {
            Template::New => render_template(&self.schema, SCHEMA_ROOT, None),
            Template::Host(index) => {
                ensure!(
                    index < self.nodes.len(),
                    error::NoSuchHostSnafu {
                        index,
                        len: self.nodes.len(),
                    }
                );
                render_template(&self.schema, NODES_ROOT, Some(&self.nodes[index]))
            }
        };
        self.template = template;
        Ok(())
    }

    pub fn controls(&self) -> &Control {
        &self.controls
    }

    pub fn controls_mut(&mut self) -> &mut Control {
        &mut self.controls
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// The fields the form submits, as a browser would serialize them.
    pub fn submitted(&self) -> SubmittedForm {
        SubmittedForm::from_pairs(self.controls.form_fields())
    }

    /// The document the current form state describes.
    pub fn document(&self) -> Result<Value> {
        reconstruct(&self.schema, &self.submitted()).context(error::ReconstructSnafu)
    }

    /// Builds the document and sends it to the backend.  Previous artifacts and errors are cleared
    /// first; afterwards exactly one of them is set.  Nothing is retried.
    pub async fn submit(&mut self, backend: &Backend) -> &[Artifact] {
        self.artifacts.clear();
        self.error = None;
        self.loading = true;

        let result = match self.document() {
            Ok(document) => backend.submit_configuration(&document).await,
            Err(e) => Err(e),
        };

        self.loading = false;
        match result {
            Ok(artifacts) => {
                info!("Build finished with {} artifacts", artifacts.len());
                self.artifacts = artifacts;
            }
            Err(e) => {
                warn!("Submission to '{}' failed: {}", backend.url(), e);
                self.error = Some(e.to_string());
            }
        }
        &self.artifacts
    }
}

fn render_template(schema: &Schema, root: &str, overlay: Option<&Value>) -> Control {
    render_schema(schema, root, overlay).unwrap_or_else(|| {
        Control::Group(formschema::render::Group {
            path: formschema::FieldPath::new(root),
            label: None,
            visible: true,
            children: Vec::new(),
        })
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::from_value(&json!({
            "localization": { "hostname": { "type": "str", "default": "homestakeros" } },
            "ssh": { "authorizedKeys": { "type": "listOf", "default": [] } }
        }))
        .unwrap()
    }

    #[test]
    fn templates_render_their_documents() {
        let host = json!({
            "localization": { "hostname": "ponkila-1" },
            "ssh": { "authorizedKeys": ["ssh-ed25519 AAAA"] }
        });
        let mut form = ConfigurationForm::new(schema(), vec![host.clone()]);
        assert_eq!(form.template_labels(), vec!["New node template", "ponkila-1"]);
        assert_eq!(form.document().unwrap(), schema().defaults());

        form.select_template(Template::Host(0)).unwrap();
        assert_eq!(form.document().unwrap(), host);

        assert!(form.select_template(Template::Host(3)).is_err());
        assert_eq!(form.template(), Template::Host(0));
    }
}
