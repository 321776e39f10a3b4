//!
//! # Assetry Core
//!
//! Assetry core defines path-templated data assets: named units of work whose output
//! is stored at a resolved path and whose re-execution is skipped while an earlier
//! materialization is still valid.
//!
//! ## Glossary
//!
//! **[Asset](crate::asset::AssetDefinition)** - a named, path-templated unit of data production
//! with a user supplied [materializer](crate::materializer::Materializer).
//! Assets are declared with [AssetDeclaration](crate::asset::AssetDeclaration) or with the
//! `#[asset]` attribute from `assetry_macro`, which reads the parameters from the function signature.
//!
//! **[Template](crate::parse::Template)** - a string containing placeholders (`{name}`, `{name.attr}`,
//! `{name[0]}`, `{name[key]}`) resolved from bound arguments by the [formatter](crate::template).
//! Resolution is purely textual, there is no expression language.
//!
//! **Partial resolution** - formatting that leaves placeholders of unbound arguments in place
//! instead of failing. Derivations resolve partially, invocations resolve fully.
//!
//! **[Bound arguments](crate::arguments::BoundArguments)** - parameter name to [value](crate::value::Value),
//! built by matching positional and keyword values against the [parameter list](crate::arguments::ParameterList).
//! A value can be another asset, so one asset's path may be built from another one's `name` or `path`.
//!
//! **Derivation** - a new definition made from an existing one by
//! [binding arguments](crate::asset::AssetDefinition::with_arguments) or
//! [overriding options](crate::asset::AssetDefinition::with_options). The source is never changed.
//!
//! **Materialization** - one successful execution of a materializer, producing an
//! [artifact](crate::artifact::Artifact): the combined file at the asset path plus the
//! fragment files under the artifacts directory.
//!
//! **[Run record](crate::metadata::AssetRun)** - append-only record of one invocation.
//!
//! **[Manifest](crate::metadata::AssetManifest)** - latest-state summary of an asset identity,
//! consulted by the cache decision. See [asset_metadata](crate::asset_metadata).
//!
//! **Signature** - fingerprint of an asset definition; a changed signature invalidates the cache.
//!
//! **[Context](crate::context::AssetContext)** - storage, query engine and metadata location,
//! built once and passed by reference to every invocation.
extern crate serde;
#[macro_use]
extern crate serde_derive;

pub mod error;
pub mod value;
pub mod parse;
pub mod template;
#[macro_use]
pub mod arguments;
pub mod options;
pub mod materializer;
pub mod metadata;
pub mod store;
pub mod query;
pub mod artifact;
pub mod context;
pub mod asset;
pub mod configurator;
pub mod asset_metadata;
pub mod engine;

// Re-export commonly used items
pub use chrono;
pub use arguments::{BoundArguments, CallArguments, Parameter, ParameterList};
pub use artifact::Artifact;
pub use asset::{AssetDeclaration, AssetDefinition};
pub use context::AssetContext;
pub use error::{Error, ErrorType};
pub use materializer::{Batch, BatchSender, Materializer, Output, Record};
pub use options::{ArtifactFileType, OptionsOverride, ReadJsonOptions};
pub use value::{FromValue, Value};
