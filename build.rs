use std::env;
use std::fs;
use std::path::PathBuf;

// Places Info.plist next to the built binaries so macOS shows the camera usage prompt.
fn main() {
    println!("cargo:rerun-if-changed=Info.plist");

    let (Ok(out_dir), Ok(manifest_dir)) = (env::var("OUT_DIR"), env::var("CARGO_MANIFEST_DIR")) else {
        return;
    };
    let source = PathBuf::from(manifest_dir).join("Info.plist");
    let Some(profile_dir) = PathBuf::from(out_dir).ancestors().nth(3).map(PathBuf::from) else {
        return;
    };

    if source.exists() {
        if let Err(e) = fs::copy(&source, profile_dir.join("Info.plist")) {
            println!("cargo:warning=could not copy Info.plist: {}", e);
        }
    }
}
