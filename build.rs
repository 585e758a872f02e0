// build.rs

fn main() {
    // --- Locate libgbm ---
    // The drm crate talks to the kernel through ioctls, so only Mesa's gbm
    // is linked. pkg-config supplies its search path for non-standard
    // prefixes; otherwise we fall back to the standard path.

    let libraries = ["gbm"];

    let mut pkg_config_success = true;

    for lib in &libraries {
        if pkg_config::probe_library(lib).is_err() {
            eprintln!(
                "pkg-config failed for library '{}'. Falling back to manual linking.",
                lib
            );
            pkg_config_success = false;
            break;
        }
    }

    if !pkg_config_success {
        println!("cargo:rustc-link-lib=gbm");
        println!("cargo:rustc-link-search=/usr/lib");
        eprintln!(
            "Manual linking flags applied. Ensure the libgbm (Mesa) development library is installed."
        );
    } else {
        eprintln!("pkg-config successfully found libgbm. Linking configured automatically.");
    }

    println!("cargo:rerun-if-changed=build.rs");
}
