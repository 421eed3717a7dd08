fn main() {
    // Declare custom cfg and make build script rerun when changed
    println!("cargo:rustc-check-cfg=cfg(llama_ffi)");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=LLAMA_CPP_DIR");
    println!("cargo:rerun-if-env-changed=LLAMA_CPP_LIB");

    // Candidate roots: explicit env var or vendored directory
    let env_dir = std::env::var("LLAMA_CPP_DIR").ok();
    let vendored_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../third_party/llama.cpp");

    fn canon(p: &std::path::Path) -> std::path::PathBuf {
        std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
    }

    let mut roots: Vec<std::path::PathBuf> = Vec::new();
    if let Some(ref d) = env_dir { roots.push(canon(std::path::Path::new(d))); }
    if vendored_dir.exists() { roots.push(canon(&vendored_dir)); }

    if roots.is_empty() {
        println!("cargo:warning=LLAMA_CPP_DIR not set and vendored llama.cpp not found; FFI disabled");
        return;
    }

    // Bindings first: without llama.h there is nothing to link against.
    let Some((root, header)) = roots.iter().find_map(|root| {
        [root.join("include/llama.h"), root.join("llama.h")]
            .into_iter()
            .find(|h| h.exists())
            .map(|h| (root.clone(), h))
    }) else {
        println!("cargo:warning=llama.h not found under LLAMA_CPP_DIR; FFI disabled");
        return;
    };

    let bindings = bindgen::Builder::default()
        .header(header.to_string_lossy())
        .allowlist_function("llama_.*")
        .allowlist_type("llama_.*")
        .allowlist_var("LLAMA_.*")
        .clang_arg(format!("-I{}", root.to_string_lossy()))
        .clang_arg(format!("-I{}", root.join("include").to_string_lossy()))
        .clang_arg(format!("-I{}", root.join("ggml/include").to_string_lossy()))
        .generate()
        .expect("bindgen failed for llama.h");
    let out_path = std::path::PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR")).join("llama_bindings.rs");
    bindings.write_to_file(out_path).expect("write bindings");
    println!("cargo:rerun-if-changed={}", header.to_string_lossy());

    println!("cargo:rustc-cfg=llama_ffi");

    // Link search paths: explicit LLAMA_CPP_LIB + common build dirs under roots
    if let Ok(extra) = std::env::var("LLAMA_CPP_LIB") {
        for p in extra.split(|c| c == ';' || c == ':').filter(|s| !s.is_empty()) {
            println!("cargo:rustc-link-search=native={}", canon(std::path::Path::new(p)).to_string_lossy());
        }
    }
    for root in &roots {
        for p in [
            root.join("build/src"),
            root.join("build/ggml/src"),
            root.join("build/src/Release"),
            root.join("build/ggml/src/Release"),
            root.join("build/bin/Release"),
        ] {
            if p.exists() { println!("cargo:rustc-link-search=native={}", canon(&p).to_string_lossy()); }
        }
    }

    // OS-specific link libraries
    let target = std::env::var("TARGET").unwrap_or_default();
    println!("cargo:rustc-link-lib=static=llama");
    println!("cargo:rustc-link-lib=static=ggml");
    println!("cargo:rustc-link-lib=static=ggml-base");
    println!("cargo:rustc-link-lib=static=ggml-cpu");
    if target.contains("apple-darwin") {
        println!("cargo:rustc-link-lib=c++");
    } else if !target.contains("windows") {
        println!("cargo:rustc-link-lib=stdc++");
        println!("cargo:rustc-link-lib=m");
        println!("cargo:rustc-link-lib=dl");
        println!("cargo:rustc-link-lib=pthread");
        println!("cargo:rustc-link-lib=gomp");
    }
}
