//! Asset definitions.
//!
//! An [AssetDefinition] couples a materializer with path, name and
//! artifacts-directory templates. Definitions are values: derivations
//! (see the `configurator` module) return independent copies, and the
//! definition a declaration produces keeps its templates intact until
//! arguments are bound.

use std::fmt;
use std::sync::Arc;

use chrono::TimeDelta;
use tracing::debug;

use crate::arguments::{BoundArguments, CallArguments, DefaultValue, ParameterList};
use crate::artifact::Artifact;
use crate::context::AssetContext;
use crate::error::Error;
use crate::materializer::Materializer;
use crate::metadata::MANIFEST_VERSION;
use crate::options::{ArtifactFileType, AssetOptions, ReadJsonOptions};
use crate::query::Relation;
use crate::template::{FormatArguments, TemplateFormatter};
use crate::value::Value;

const ASSET_ID_LENGTH: usize = 32;

/// Template sources of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetTemplates {
    pub path: String,
    pub name: String,
    pub artifacts_dir: Option<String>,
}

/// Declaration of an asset; finished by [AssetDeclaration::materializer].
///
/// ```ignore
/// let orders = AssetDeclaration::new("{customer}/{endpoint}.parquet")
///     .name("{customer}_{endpoint}")
///     .materializer("orders", parameters, fetch_orders);
/// ```
#[derive(Debug, Clone)]
pub struct AssetDeclaration {
    path: String,
    name: Option<String>,
    artifacts_dir: Option<String>,
    options: AssetOptions,
}

impl AssetDeclaration {
    pub fn new(path: &str) -> Self {
        AssetDeclaration {
            path: path.to_owned(),
            name: None,
            artifacts_dir: None,
            options: AssetOptions::default(),
        }
    }

    /// Name template; defaults to the materializer name.
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    pub fn artifacts_dir(mut self, artifacts_dir: Option<&str>) -> Self {
        self.artifacts_dir = artifacts_dir.map(|d| d.to_owned());
        self
    }

    pub fn artifact_filetype(mut self, filetype: ArtifactFileType) -> Self {
        self.options.artifact_filetype = filetype;
        self
    }

    pub fn snapshot_artifacts(mut self, snapshot: bool) -> Self {
        self.options.snapshot_artifacts = snapshot;
        self
    }

    pub fn cache_expiration(mut self, expiration: TimeDelta) -> Self {
        self.options.cache_expiration = Some(expiration);
        self
    }

    pub fn read_json_options(mut self, options: ReadJsonOptions) -> Self {
        self.options.read_json_options = options;
        self
    }

    pub fn materializer<M: Materializer + 'static>(
        self,
        fn_name: &str,
        parameters: ParameterList,
        materializer: M,
    ) -> AssetDefinition {
        let name = self.name.unwrap_or_else(|| fn_name.to_owned());
        let mut options = self.options;
        options.artifacts_dir = self.artifacts_dir.clone().unwrap_or_default();
        AssetDefinition {
            fn_name: fn_name.to_owned(),
            parameters: Arc::new(parameters),
            materializer: Arc::new(materializer),
            templates: AssetTemplates {
                path: self.path.clone(),
                name: name.clone(),
                artifacts_dir: self.artifacts_dir,
            },
            path: self.path,
            name,
            options,
            bound: BoundArguments::new(),
        }
    }
}

/// A declared asset, possibly with some arguments bound.
#[derive(Clone)]
pub struct AssetDefinition {
    pub(crate) fn_name: String,
    pub(crate) parameters: Arc<ParameterList>,
    pub(crate) materializer: Arc<dyn Materializer>,
    pub(crate) templates: AssetTemplates,
    /// Path resolved as far as the bound arguments allow.
    pub(crate) path: String,
    pub(crate) name: String,
    pub(crate) options: AssetOptions,
    pub(crate) bound: BoundArguments,
}

impl fmt::Debug for AssetDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetDefinition")
            .field("fn_name", &self.fn_name)
            .field("templates", &self.templates)
            .field("path", &self.path)
            .field("name", &self.name)
            .field("options", &self.options)
            .field("bound", &self.bound)
            .finish()
    }
}

/// Materializers are compared by name only.
impl PartialEq for AssetDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.fn_name == other.fn_name
            && self.templates == other.templates
            && self.path == other.path
            && self.name == other.name
            && self.options == other.options
            && self.bound == other.bound
    }
}

/// Outcome of the final template resolution of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAsset {
    pub id: String,
    pub name: String,
    pub path: String,
    pub artifacts_dir: String,
    pub arguments: BoundArguments,
    pub signature: String,
    /// Options with `artifacts_dir` resolved.
    pub options: AssetOptions,
}

impl AssetDefinition {
    pub fn fn_name(&self) -> &str {
        &self.fn_name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn artifacts_dir(&self) -> &str {
        &self.options.artifacts_dir
    }

    pub fn options(&self) -> &AssetOptions {
        &self.options
    }

    pub fn templates(&self) -> &AssetTemplates {
        &self.templates
    }

    pub fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    pub fn bound_arguments(&self) -> &BoundArguments {
        &self.bound
    }

    /// Attribute lookup used by `{asset.attr}` placeholders.
    /// Unknown attributes fall back to the bound arguments.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::Text(self.name.clone())),
            "path" => Some(Value::Text(self.path.clone())),
            "artifacts_dir" => Some(Value::Text(self.options.artifacts_dir.clone())),
            "fn_name" => Some(Value::Text(self.fn_name.clone())),
            "artifact_filetype" => Some(Value::Text(self.options.artifact_filetype.to_string())),
            "arguments" => Some(Value::Object(
                self.bound
                    .iter()
                    .map(|(n, v)| (n.to_owned(), v.clone()))
                    .collect(),
            )),
            _ => self.bound.get(name).cloned(),
        }
    }

    /// Every parameter without a default is bound.
    pub fn is_concrete(&self) -> bool {
        !self.bound.is_empty()
            && self
                .parameters
                .iter()
                .all(|p| p.has_default() || self.bound.contains(&p.name))
    }

    /// Resolve path, name and artifacts directory against `bound`.
    pub fn resolve_templates(
        &self,
        bound: &BoundArguments,
        allow_partial: bool,
    ) -> Result<(String, String, String), Error> {
        let arguments = FormatArguments::from_bound(bound);
        let formatter = TemplateFormatter::new(&arguments);
        let path = formatter
            .format(Some(&self.templates.path), allow_partial)?
            .unwrap_or_default();
        let name = formatter
            .format(Some(&self.templates.name), allow_partial)?
            .unwrap_or_default();
        let artifacts_dir = formatter
            .format(self.templates.artifacts_dir.as_deref(), allow_partial)?
            .unwrap_or_default();
        Ok((path, name, artifacts_dir))
    }

    /// Re-resolve the templates in partial mode against the current bindings
    /// and the parameter defaults.
    pub(crate) fn refresh(&mut self) -> Result<(), Error> {
        let (path, name, artifacts_dir) = self
            .resolve_templates(&self.bound_with_defaults(), true)
            .map_err(|e| e.with_asset(&self.fn_name))?;
        self.path = path;
        self.name = name;
        self.options.artifacts_dir = artifacts_dir;
        Ok(())
    }

    /// Bind call arguments for one invocation and finish template resolution.
    /// The definition itself is not changed.
    pub fn resolve(&self, call: &CallArguments) -> Result<ResolvedAsset, Error> {
        let mut arguments = self.parameters.bind(&self.bound, call)?;
        self.parameters.apply_defaults(&mut arguments);
        let (path, name, artifacts_dir) = self
            .resolve_templates(&arguments, false)
            .map_err(|e| e.with_asset(&self.fn_name))?;
        self.parameters
            .check_complete(&arguments)
            .map_err(|e| e.with_asset(&name))?;
        debug!(asset = %self.fn_name, path = %path, name = %name, "templates finalized");

        let mut options = self.options.clone();
        options.artifacts_dir = artifacts_dir.clone();
        Ok(ResolvedAsset {
            id: asset_id(&name, &path, &artifacts_dir, &arguments),
            signature: self.signature(),
            name,
            path,
            artifacts_dir,
            arguments,
            options,
        })
    }

    /// Identity of the definition with its current bindings.
    ///
    /// For a definition that resolves without further arguments this is the
    /// id its run records and manifest are stored under.
    pub fn id(&self) -> String {
        match self.resolve(&CallArguments::new()) {
            Ok(resolved) => resolved.id,
            Err(_) => asset_id(
                &self.name,
                &self.path,
                &self.options.artifacts_dir,
                &self.bound_with_defaults(),
            ),
        }
    }

    fn bound_with_defaults(&self) -> BoundArguments {
        let mut bound = self.bound.clone();
        self.parameters.apply_defaults(&mut bound);
        bound
    }

    /// Fingerprint of the definition shape.
    /// Changes when the parameters, templates or the artifact format change.
    pub fn signature(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        let mut field = |text: &str| {
            hasher.update(text.as_bytes());
            hasher.update(&[0]);
        };
        field(MANIFEST_VERSION);
        field(&self.fn_name);
        for parameter in self.parameters.iter() {
            field(&parameter.name);
            match &parameter.default {
                DefaultValue::Value(value) => field(&value.to_json().to_string()),
                DefaultValue::NoDefault => field(""),
            }
        }
        field(&self.templates.path);
        field(&self.templates.name);
        field(self.templates.artifacts_dir.as_deref().unwrap_or(""));
        field(self.options.artifact_filetype.extension());
        field(if self.options.snapshot_artifacts { "snapshot" } else { "" });
        hasher.finalize().to_hex().to_string()
    }

    /// Materialize the asset (or reuse a cached materialization).
    ///
    /// A concrete definition adopts the path, name and artifacts directory
    /// resolved for this call.
    pub async fn invoke(&mut self, context: &AssetContext, call: CallArguments) -> Result<Artifact, Error> {
        let resolved = self.resolve(&call)?;
        if self.is_concrete() {
            self.path = resolved.path.clone();
            self.name = resolved.name.clone();
            self.options.artifacts_dir = resolved.artifacts_dir.clone();
        }
        context.engine().run(self, resolved).await
    }

    /// Invoke and read the produced data back.
    pub async fn query(&mut self, context: &AssetContext, call: CallArguments) -> Result<Option<Relation>, Error> {
        let artifact = self.invoke(context, call).await?;
        artifact.query(context).await
    }
}

fn asset_id(name: &str, path: &str, artifacts_dir: &str, arguments: &BoundArguments) -> String {
    let key = format!("{}:{}:{}:{}", name, path, artifacts_dir, arguments.to_json());
    let mut id = blake3::hash(key.as_bytes()).to_hex().to_string();
    id.truncate(ASSET_ID_LENGTH);
    id
}
