use kasm::jvm::Error;
use kasm::pool::ClassPool;

use clap::{command, Arg, ArgAction};
use std::path::{Path, PathBuf};

fn load(pool: &mut ClassPool, input: &Path) -> Result<usize, Error> {
    if input.is_dir() {
        pool.load_directory(input)
    } else {
        pool.load_archive(input)
    }
}

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = command!()
        .about("Load a JAR or class directory into a class pool, and optionally save it back")
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("PATH")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Re-encode every class into this archive (or directory, if it ends in `/`)"),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .action(ArgAction::SetTrue)
                .help("Print the name, super class, and member counts of each class"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Input JAR, ZIP, or directory of `.class` files")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf))
                .index(1),
        )
        .get_matches();

    let input = matches
        .get_one::<PathBuf>("INPUT")
        .ok_or_else(|| Error::MalformedInput(String::from("missing input")))?;

    let mut pool = ClassPool::new();
    let loaded = load(&mut pool, input)?;
    log::info!("Loaded {} classes from '{}'", loaded, input.display());

    if matches.get_flag("list") {
        for class in &pool {
            println!(
                "{} extends {} ({} fields, {} methods)",
                class.name,
                class.super_name.as_deref().unwrap_or("-"),
                class.fields.len(),
                class.methods.len(),
            );
        }
    }

    if let Some(output) = matches.get_one::<PathBuf>("output") {
        if output.is_dir() || output.to_string_lossy().ends_with('/') {
            pool.save_directory(output)?;
        } else {
            pool.save_archive(output)?;
        }
        log::info!("Wrote {} classes to '{}'", pool.len(), output.display());
    }

    Ok(())
}
