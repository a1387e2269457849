use std::env;
use std::fs;
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=config/artifacts");
    println!("cargo:rerun-if-env-changed=ARTIFACT_ENGINE_DEFINITIONS");

    check_builtin_definitions()?;

    Ok(())
}

/// The built-in definitions are embedded with `include_dir!`, so the
/// directory must exist and hold at least one YAML file.
fn check_builtin_definitions() -> Result<(), Box<dyn std::error::Error>> {
    let definitions_dir = Path::new("config/artifacts");
    fs::create_dir_all(definitions_dir)?;

    // Extra definitions copied in for custom builds
    if let Ok(extra) = env::var("ARTIFACT_ENGINE_DEFINITIONS") {
        let extra = Path::new(&extra);
        if extra.is_file() {
            if let Some(file_name) = extra.file_name() {
                println!("cargo:warning=Embedding extra definitions from {}", extra.display());
                fs::copy(extra, definitions_dir.join(file_name))?;
            }
        } else {
            println!("cargo:warning=Extra definitions not found: {}", extra.display());
        }
    }

    let yaml_files = fs::read_dir(definitions_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map_or(false, |ext| ext == "yaml" || ext == "yml")
        })
        .count();

    if yaml_files == 0 {
        println!("cargo:warning=No built-in artifact definitions found in config/artifacts");
    }

    Ok(())
}
