
use serde::Deserialize;
use std::{collections::BTreeMap, env, fs, path::PathBuf};

/// One architecture entry of `flags.json`.
#[derive(Deserialize)]
struct FlagTable {
    #[serde(rename = "MAX_PENDING_REQUESTS")]
    max_pending_requests: String,
    #[serde(rename = "LOCK_SPIN_BEFORE_RELAX")]
    lock_spin_before_relax: String,
}

fn main(){

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    let flags_str = fs::read_to_string(PathBuf::from(manifest_dir.clone()).join("../../flags.json")).unwrap();
    let mut flagmap: BTreeMap<String, FlagTable> = serde_json::from_str(&flags_str).unwrap();
    let flags = match flagmap.remove(target_arch.as_str()){
        Some(value) => value,
        None => match flagmap.remove("default") {
            Some(value) => value,
            None => panic!("No flags for architecture '{}' and no default entry.", target_arch)
        }
    };
    make_flags(&flags);
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../../flags.json");
}

fn parse_usize(key: &str, value: &str) -> usize {
    value
        .trim()
        .replace("_", "")
        .parse()
        .unwrap_or_else(|err| panic!("Flag {} is not a number ({:?}): {}", key, value, err))
}

fn make_flags(flags: &FlagTable){
    let entries = [
        (
            "MAX_PENDING_REQUESTS",
            "Upper bound on enumeration request records alive at the same time.",
            parse_usize("MAX_PENDING_REQUESTS", &flags.max_pending_requests),
        ),
        (
            "LOCK_SPIN_BEFORE_RELAX",
            "Busy-wait iterations on a contended tree lock before yielding the CPU.",
            parse_usize("LOCK_SPIN_BEFORE_RELAX", &flags.lock_spin_before_relax),
        ),
    ];
    let mut s: String = String::from("");
    for (key, doc, value) in entries {
        s += format!("/// {}\npub const {}:usize       = {};\n", doc, key, value).as_str();
    }
    let out_dir = env::var("OUT_DIR").unwrap();
    let path = PathBuf::from(out_dir).join("build_flags.rs");
    fs::write(path,s).unwrap();
}
