// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: capsule ID
fn id_arg() -> Arg {
    Arg::new("id").required(true).help("Capsule ID (file name without archive suffix)")
}

fn build_cli() -> Command {
    Command::new("scriptorium")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Scriptorium Contributors")
        .about("Capsule store and format conversion for scripture corpora")
        .subcommand_required(false)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Configuration file (TOML)"),
        )
        .arg(
            Arg::new("capsules_dir")
                .long("capsules-dir")
                .value_name("DIR")
                .global(true)
                .help("Capsule directory, overriding the configuration"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print JSON instead of text"),
        )
        .subcommand(Command::new("list").about("List capsules"))
        .subcommand(Command::new("scan").about("Report CAS layout and IR presence of every capsule"))
        .subcommand(Command::new("manifest").about("Show a capsule's manifest").arg(id_arg()))
        .subcommand(
            Command::new("artifacts")
                .about("List the members of a capsule with their SHA-256")
                .arg(id_arg()),
        )
        .subcommand(
            Command::new("cat")
                .about("Write one member of a capsule to stdout")
                .arg(id_arg())
                .arg(Arg::new("artifact").required(true).help("Capsule-relative member path")),
        )
        .subcommand(
            Command::new("extract")
                .about("Extract a capsule into a directory")
                .arg(id_arg())
                .arg(Arg::new("dest").required(true).help("Destination directory")),
        )
        .subcommand(Command::new("detect").about("Detect the source format of a capsule").arg(id_arg()))
        .subcommand(
            Command::new("generate-ir")
                .about("Add intermediate representation to a capsule")
                .arg(Arg::new("id").help("Capsule ID (omit with --all)"))
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Every capsule without IR"),
                ),
        )
        .subcommand(
            Command::new("convert")
                .about("Rewrite a capsule in another format")
                .arg(id_arg())
                .arg(Arg::new("target").required(true).help("Target format")),
        )
        .subcommand(Command::new("plugins").about("List available plugins"))
        .subcommand(Command::new("bibles").about("List capsules holding Bibles"))
        .subcommand(Command::new("modules").about("List installed and installable SWORD modules"))
        .subcommand(Command::new("external-modules").about("List the external module directory"))
        .subcommand(
            Command::new("install")
                .about("Copy an archive into the capsule directory")
                .arg(Arg::new("path").required(true).help("Archive to install")),
        )
        .subcommand(Command::new("delete").about("Remove a capsule").arg(id_arg()))
        .subcommand(
            Command::new("cache-stats")
                .about("Populate caches and show their counters")
                .arg(
                    Arg::new("follow")
                        .long("follow")
                        .action(ArgAction::SetTrue)
                        .help("Keep refreshing caches in the background until interrupted"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("scriptorium.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
