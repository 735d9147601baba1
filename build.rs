fn main() {
    println!("cargo:rerun-if-env-changed=PYTY_VERSION");
    if let Ok(version) = std::env::var("PYTY_VERSION") {
        println!("cargo:rustc-env=CARGO_PKG_VERSION={version}");
    }
}
