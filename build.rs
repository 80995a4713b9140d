use rustc_version::version;

fn main() {
    // Surfaced in the CLI's long version string.
    let rustc = version()
        .map(|v| v.to_string())
        .unwrap_or_else(|_| "unknown".to_owned());
    println!("cargo:rustc-env=RUSTC_VERSION={rustc}");
    println!("cargo:rerun-if-changed=build.rs");
}
