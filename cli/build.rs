use std::env;

use anyhow::Context as _;
use anyhow::Result;

use grev::git_revision_auto;


/// Embed the package version, suffixed with the git revision when
/// building from a checkout, as `VERSION`.
fn main() -> Result<()> {
    let manifest_dir =
        env::var("CARGO_MANIFEST_DIR").context("CARGO_MANIFEST_DIR is not set")?;
    let version = match git_revision_auto(manifest_dir)? {
        Some(git_rev) => format!("{} ({git_rev})", env!("CARGO_PKG_VERSION")),
        None => env!("CARGO_PKG_VERSION").to_string(),
    };
    println!("cargo:rustc-env=VERSION={version}");
    Ok(())
}
