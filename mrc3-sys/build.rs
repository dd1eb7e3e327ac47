use std::env;
use std::path::PathBuf;

// These helper functions are only used when the mrc3-sdk feature is enabled
#[allow(dead_code)]
/// Print a boxed error message for visibility in cargo output
fn print_env_error(title: &str, details: &[&str], fixes: &[&str]) {
    eprintln!();
    eprintln!("╔══════════════════════════════════════════════════════════════════╗");
    eprintln!("║ MRC3 BUILD ERROR: {:<47} ║", title);
    eprintln!("╠══════════════════════════════════════════════════════════════════╣");
    for detail in details {
        eprintln!("║ {:<66} ║", detail);
    }
    eprintln!("╠══════════════════════════════════════════════════════════════════╣");
    eprintln!("║ HOW TO FIX:                                                      ║");
    for fix in fixes {
        eprintln!("║   {:<64} ║", fix);
    }
    eprintln!("╚══════════════════════════════════════════════════════════════════╝");
    eprintln!();
}

#[allow(dead_code)]
/// Check the usual MetroPro installation directories for the client library
fn find_mrc3_lib() -> Option<PathBuf> {
    let candidates = [
        "C:\\MetroPro\\mrc",
        "C:\\Program Files\\Zygo\\MetroPro\\mrc",
        "C:\\Program Files (x86)\\Zygo\\MetroPro\\mrc",
        "/opt/zygo/mrc/lib",
    ];

    candidates
        .iter()
        .map(PathBuf::from)
        .find(|p| p.join("mrc3_client.lib").exists() || p.join("libmrc3_client.so").exists())
}

fn main() {
    // Only run the linking logic if the `mrc3-sdk` feature is enabled.
    // This allows the crate to compile without the vendor library.
    #[cfg(feature = "mrc3-sdk")]
    {
        println!("cargo:rerun-if-env-changed=MRC3_SDK_DIR");

        let lib_dir = match env::var("MRC3_SDK_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                if let Some(found) = find_mrc3_lib() {
                    println!(
                        "cargo:warning=MRC3_SDK_DIR not set, auto-detected: {}",
                        found.display()
                    );
                    found
                } else {
                    print_env_error(
                        "MRC3_SDK_DIR not set",
                        &[
                            "The mrc3-sdk feature links against mrc3_client.",
                            "This environment variable tells the linker where it lives.",
                        ],
                        &["set MRC3_SDK_DIR=C:\\MetroPro\\mrc"],
                    );
                    panic!("MRC3_SDK_DIR environment variable must be set when `mrc3-sdk` feature is enabled.");
                }
            }
        };

        if !lib_dir.exists() {
            println!(
                "cargo:warning=MRC3 library path does not exist: {}",
                lib_dir.display()
            );
            println!("cargo:warning=Linker will search standard paths");
        }

        println!("cargo:rustc-link-search=native={}", lib_dir.display());
        println!("cargo:rustc-link-lib=dylib=mrc3_client");
    }

    #[cfg(not(feature = "mrc3-sdk"))]
    {
        let _ = env::var("MRC3_SDK_DIR");
    }
}
