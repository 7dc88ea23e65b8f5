use std::path::Path;

use bluebuild_core::blueprint::{normalize, resolve, Blueprint, RawBlueprint};
use bluebuild_core::error::BlueprintError;

/// Run the full validation pipeline over blueprint text.
pub fn load_blueprint(text: &str) -> Result<Blueprint, BlueprintError> {
    let raw = RawBlueprint::from_str_named(text, Path::new("test.blueprint"))?;
    resolve(&normalize(raw)?)
}
