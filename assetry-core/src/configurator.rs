//! Derivations of asset definitions.
//!
//! Every method returns a new definition and leaves the receiver untouched.
//! Templates of the result are resolved in partial mode right away, so
//! `path()` and `name()` show as much as the bound arguments allow.

use chrono::TimeDelta;
use tracing::debug;

use crate::arguments::CallArguments;
use crate::asset::AssetDefinition;
use crate::error::Error;
use crate::options::{OptionsOverride, CACHE_FIRST_CACHE_EXPIRATION};

impl AssetDefinition {
    /// Bind further arguments.
    ///
    /// ```ignore
    /// let acme = orders().with_arguments(args![customer = "acme"])?;
    /// assert_eq!(acme.path(), "acme/{endpoint}.parquet");
    /// ```
    pub fn with_arguments(&self, call: CallArguments) -> Result<AssetDefinition, Error> {
        let mut asset = self.clone();
        asset.bound = self
            .parameters
            .bind(&self.bound, &call)
            .map_err(|e| e.with_asset(&self.fn_name))?;
        asset.refresh()?;
        debug!(asset = %asset.fn_name, path = %asset.path, bound = ?asset.bound.names(), "arguments bound");
        Ok(asset)
    }

    /// Override options and templates.
    ///
    /// A supplied path, name or artifacts directory becomes the template the
    /// result resolves from. Bound arguments carry over and are applied to the
    /// new templates.
    pub fn with_options(&self, overrides: OptionsOverride) -> Result<AssetDefinition, Error> {
        let mut asset = self.clone();
        if let Some(path) = overrides.path {
            asset.templates.path = path;
        }
        if let Some(name) = overrides.name {
            asset.templates.name = name;
        }
        if let Some(artifacts_dir) = overrides.artifacts_dir {
            asset.templates.artifacts_dir = Some(artifacts_dir);
        }
        if let Some(filetype) = overrides.artifact_filetype {
            asset.options.artifact_filetype = filetype;
        }
        if let Some(snapshot) = overrides.snapshot_artifacts {
            asset.options.snapshot_artifacts = snapshot;
        }
        if let Some(read_json_options) = overrides.read_json_options {
            asset.options.read_json_options = read_json_options;
        }
        if let Some(expiration) = overrides.cache_expiration {
            asset.options.cache_expiration = Some(expiration);
        }
        asset.refresh()?;
        Ok(asset)
    }

    /// Reuse a successful materialization younger than `expiration`
    /// (default [CACHE_FIRST_CACHE_EXPIRATION]).
    pub fn cache_first(&self, expiration: Option<TimeDelta>) -> Result<AssetDefinition, Error> {
        self.with_options(
            OptionsOverride::new().cache_expiration(expiration.unwrap_or(CACHE_FIRST_CACHE_EXPIRATION)),
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::arguments::{BoundArguments, Parameter, ParameterList};
    use crate::asset::{AssetDeclaration, AssetDefinition};
    use crate::error::{Error, ErrorType};
    use crate::materializer::Output;
    use crate::options::{ArtifactFileType, OptionsOverride, CACHE_FIRST_CACHE_EXPIRATION};
    use crate::value::Value;

    fn endpoint() -> AssetDefinition {
        AssetDeclaration::new("{customer}/{endpoint}.parquet")
            .name("{customer}_{endpoint}")
            .artifacts_dir(Some("raw/{customer}"))
            .materializer(
                "endpoint",
                ParameterList::new(vec![
                    Parameter::required("customer"),
                    Parameter::required("endpoint"),
                    Parameter::with_default("limit", 100),
                ]),
                |_: BoundArguments| async { Ok::<Output, Error>(Output::Empty) },
            )
    }

    #[test]
    fn partial_then_full() -> Result<(), Error> {
        let acme = endpoint().with_arguments(args![customer = "acme"])?;
        assert_eq!(acme.path(), "acme/{endpoint}.parquet");
        assert_eq!(acme.name(), "acme_{endpoint}");
        assert_eq!(acme.artifacts_dir(), "raw/acme");

        let resolved = acme.resolve(&args![endpoint = "orders"])?;
        assert_eq!(resolved.path, "acme/orders.parquet");
        assert_eq!(resolved.arguments.get("limit"), Some(&Value::I64(100)));
        Ok(())
    }

    #[test]
    fn defaults_fill_derived_templates() -> Result<(), Error> {
        let top = endpoint().with_options(OptionsOverride::new().path("{customer}/top_{limit}.parquet"))?;
        assert_eq!(top.path(), "{customer}/top_100.parquet");

        let acme = top.with_arguments(args![customer = "acme"])?;
        assert_eq!(acme.path(), "acme/top_100.parquet");
        assert!(!acme.bound_arguments().contains("limit"));

        let short = acme.with_arguments(args![limit = 5])?;
        assert_eq!(short.path(), "acme/top_5.parquet");
        Ok(())
    }

    #[test]
    fn chained_equals_single() -> Result<(), Error> {
        let chained = endpoint()
            .with_arguments(args![customer = "acme"])?
            .with_arguments(args![endpoint = "orders"])?;
        let single = endpoint().with_arguments(args!["acme", "orders"])?;
        assert_eq!(chained.path(), single.path());
        assert_eq!(chained.name(), single.name());
        assert_eq!(chained.id(), single.id());
        assert!(chained.is_concrete());
        Ok(())
    }

    #[test]
    fn siblings_are_independent() -> Result<(), Error> {
        let base = endpoint();
        let acme = base.with_arguments(args![customer = "acme"])?;
        let globex = base.with_arguments(args![customer = "globex"])?;
        assert_eq!(acme.artifacts_dir(), "raw/acme");
        assert_eq!(globex.artifacts_dir(), "raw/globex");
        assert_eq!(base.artifacts_dir(), "raw/{customer}");
        assert!(base.bound_arguments().is_empty());
        Ok(())
    }

    #[test]
    fn receiver_keeps_bindings_on_rebind() -> Result<(), Error> {
        let acme = endpoint().with_arguments(args![customer = "acme"])?;
        let globex = acme.with_arguments(args![customer = "globex"])?;
        assert_eq!(acme.bound_arguments().get("customer"), Some(&Value::from("acme")));
        assert_eq!(globex.path(), "globex/{endpoint}.parquet");
        Ok(())
    }

    #[test]
    fn options_override_templates() -> Result<(), Error> {
        let acme = endpoint().with_arguments(args![customer = "acme"])?;
        let moved = acme.with_options(
            OptionsOverride::new()
                .path("archive/{customer}/{endpoint}.json")
                .artifact_filetype(ArtifactFileType::Json),
        )?;
        assert_eq!(moved.path(), "archive/acme/{endpoint}.json");
        assert_eq!(moved.templates().path, "archive/{customer}/{endpoint}.json");
        assert_eq!(moved.artifacts_dir(), "raw/acme");
        assert_eq!(moved.options().artifact_filetype, ArtifactFileType::Json);

        // later derivations resolve against the override
        let orders = moved.with_arguments(args![endpoint = "orders"])?;
        assert_eq!(orders.path(), "archive/acme/orders.json");
        assert_eq!(acme.path(), "acme/{endpoint}.parquet");
        Ok(())
    }

    #[test]
    fn missing_artifacts_dir_is_empty() -> Result<(), Error> {
        let asset = AssetDeclaration::new("{x}.json")
            .artifacts_dir(None)
            .materializer(
                "x",
                ParameterList::new(vec![Parameter::required("x")]),
                |_: BoundArguments| async { Ok::<Output, Error>(Output::Empty) },
            );
        let bound = asset.with_arguments(args!["a"])?;
        assert_eq!(bound.artifacts_dir(), "");
        assert_eq!(bound.resolve(&args![])?.artifacts_dir, "");
        Ok(())
    }

    #[test]
    fn cache_first_default_expiration() -> Result<(), Error> {
        let cached = endpoint().cache_first(None)?;
        assert_eq!(cached.options().cache_expiration, Some(CACHE_FIRST_CACHE_EXPIRATION));
        assert_eq!(endpoint().options().cache_expiration, None);
        Ok(())
    }

    #[test]
    fn mapping_key_survives_partial_resolution() -> Result<(), Error> {
        let asset = AssetDeclaration::new("{metadata[customer]}/{endpoint}.json").materializer(
            "keyed",
            ParameterList::new(vec![Parameter::required("endpoint"), Parameter::required("metadata")]),
            |_: BoundArguments| async { Ok::<Output, Error>(Output::Empty) },
        );
        let orders = asset.with_arguments(args![endpoint = "orders"])?;
        assert_eq!(orders.path(), "{metadata_customer_}/orders.json");

        let resolved = orders.resolve(&args![metadata = Value::object([("customer", "acme")])])?;
        assert_eq!(resolved.path, "acme/orders.json");
        Ok(())
    }

    #[test]
    fn binding_errors() {
        let e = endpoint().with_arguments(args!["a", "b", 1, 2]).unwrap_err();
        assert_eq!(e.error_type, ErrorType::ArgumentError);
        let e = endpoint().with_arguments(args![region = "eu"]).unwrap_err();
        assert!(e.message.contains("region"));
    }
}
