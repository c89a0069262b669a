//! kpack-inspect: print the contents of a .kpack archive.
//!
//! Input: one or more archive paths. Output: group/family, compression
//! scheme, architectures, and the binaries with kernels per architecture.

use kpack::Archive;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let mut archives: Vec<String> = Vec::new();
    let mut list_arches_only = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--arches" => {
                list_arches_only = true;
            }
            _ if arg.starts_with('-') => {
                return Err(format!("unknown option: {}", arg).into());
            }
            _ => archives.push(arg),
        }
    }

    if archives.is_empty() {
        return Err("usage: kpack-inspect [--arches] <archive.kpack>...".into());
    }

    for path in &archives {
        if list_arches_only {
            kpack::enumerate_architectures(path, |arch| {
                println!("{arch}");
                true
            })?;
            continue;
        }

        let archive = Archive::open(path)?;
        println!("{path}:");
        println!("  group: {}", archive.group_name());
        println!("  family: {}", archive.arch_family());
        println!("  scheme: {}", archive.scheme().name());
        println!("  architectures ({}):", archive.architecture_count());
        for arch in archive.architectures() {
            println!("    {arch}");
        }
        println!("  binaries ({}):", archive.binary_count());
        for index in 0..archive.binary_count() {
            println!("    {}", archive.binary(index)?);
        }
    }

    Ok(())
}
