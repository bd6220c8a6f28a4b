//! Build script for LogCrunch.
//!
//! Ensures the project is recompiled when migration files change, which the
//! `SQLx` `migrate!()` macro needs to pick up schema edits.

fn main() {
    println!("cargo:rerun-if-changed=migrations");
}
