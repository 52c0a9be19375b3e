use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=ROCM_PATH");

    // HIP is only linked for real GPU builds; the default build uses the
    // host-backed allocation fallback and needs no ROCm install.
    if env::var("CARGO_FEATURE_ROCM").is_ok() {
        let rocm_root = env::var("ROCM_PATH").unwrap_or_else(|_| "/opt/rocm".to_string());
        println!("cargo:rustc-link-search=native={}/lib", rocm_root);
        println!("cargo:rustc-link-lib=dylib=amdhip64");
    }
}
