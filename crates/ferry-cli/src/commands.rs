use std::io::{self, Write};

use anyhow::{bail, Context as _};
use colored::Colorize;
use ferry_sdk::{
    delete_if_exists, download_dir, path, upload_dir, with_prefix, Copier, ObjectInfo,
    OpenOptions, Session, SyncError, TransferReport, UploadOptions,
};

use crate::cli::*;
use crate::config::FerryConfig;

/// Flags merged over the configuration file.
struct Context {
    config: FerryConfig,
    open: OpenOptions,
    format: OutputFormat,
}

impl Context {
    fn new(cli: &Cli) -> anyhow::Result<Self> {
        let config = FerryConfig::load(cli.config.as_deref())?;
        let username = cli
            .user
            .clone()
            .unwrap_or_else(|| config.credentials.username.clone());
        let password = cli
            .password
            .clone()
            .unwrap_or_else(|| config.credentials.password.clone());
        let mut open = OpenOptions::new().credentials(username, password);
        if let Some(size) = cli.chunk_size.or(config.chunking.max_chunk_size) {
            open = open.max_chunk_size(size);
        }
        Ok(Self {
            config,
            open,
            format: cli.format.clone(),
        })
    }

    fn session(&self, url: &str) -> anyhow::Result<(Box<dyn Session>, String)> {
        self.open
            .open(url)
            .with_context(|| format!("opening {url}"))
    }

    /// Session with every path already rebased onto the URL's directory.
    fn rooted_session(&self, url: &str) -> anyhow::Result<Box<dyn Session>> {
        let (session, base) = self.session(url)?;
        Ok(with_prefix(session, &base))
    }
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::new(&cli)?;
    match cli.command {
        Command::Ls(args) => cmd_ls(&ctx, args),
        Command::Upload(args) => cmd_upload(&ctx, args),
        Command::Download(args) => cmd_download(&ctx, args),
        Command::Push(args) => cmd_push(&ctx, args),
        Command::Pull(args) => cmd_pull(&ctx, args),
        Command::Rm(args) => cmd_rm(&ctx, args),
        Command::Mv(args) => cmd_mv(&ctx, args),
        Command::Cat(args) => cmd_cat(&ctx, args),
    }
}

fn cmd_ls(ctx: &Context, args: LsArgs) -> anyhow::Result<()> {
    let session = ctx.rooted_session(&args.url)?;
    let entries = session.list(&args.path)?;
    session.close()?;
    match ctx.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text => {
            for entry in &entries {
                println!("{}", format_entry(entry));
            }
        }
    }
    Ok(())
}

fn format_entry(entry: &ObjectInfo) -> String {
    let size = entry
        .size
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".into());
    let modified = entry
        .modified
        .map(|m| m.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".repeat(19));
    let name = if entry.is_dir {
        format!("{}/", entry.name).blue().bold().to_string()
    } else {
        entry.name.clone()
    };
    format!("{size:>12}  {}  {name}", modified.dimmed())
}

fn cmd_upload(ctx: &Context, args: UploadArgs) -> anyhow::Result<()> {
    let (session, base) = ctx.session(&args.url)?;
    let copier = Copier::upload(session, base);
    let bytes = copier.copy(&args.local.to_string_lossy(), &args.remote)?;
    copier.close()?;
    println!(
        "{} {} → {} ({} bytes)",
        "✓".green().bold(),
        args.local.display(),
        copier.resolve(&args.remote).yellow(),
        bytes
    );
    Ok(())
}

fn cmd_download(ctx: &Context, args: DownloadArgs) -> anyhow::Result<()> {
    let (session, base) = ctx.session(&args.url)?;
    let copier = Copier::download(session, base);
    let bytes = copier.copy(&args.remote, &args.local.to_string_lossy())?;
    copier.close()?;
    println!(
        "{} {} → {} ({} bytes)",
        "✓".green().bold(),
        copier.resolve(&args.remote).yellow(),
        args.local.display(),
        bytes
    );
    Ok(())
}

fn print_report(ctx: &Context, verb: &str, report: &TransferReport) -> anyhow::Result<()> {
    match ctx.format {
        OutputFormat::Json => println!("{}", serde_json::to_string(report)?),
        OutputFormat::Text => println!(
            "{} {} {} files ({} bytes)",
            "✓".green().bold(),
            verb,
            report.files.to_string().bold(),
            report.bytes
        ),
    }
    Ok(())
}

fn cmd_push(ctx: &Context, args: PushArgs) -> anyhow::Result<()> {
    let (session, base) = ctx.session(&args.url)?;
    let options = UploadOptions {
        delete_before_upload: ctx.config.transfer.delete_before_upload && !args.no_replace,
        delete_after_upload: ctx.config.transfer.delete_after_upload || args.delete_after,
    };
    let remote_dir = path::join(&base, &args.remote_dir);
    let report = upload_dir(&session, &args.local_dir, &remote_dir, &options)?;
    session.close()?;
    print_report(ctx, "Uploaded", &report)
}

fn cmd_pull(ctx: &Context, args: PullArgs) -> anyhow::Result<()> {
    let (session, base) = ctx.session(&args.url)?;
    let delete_after = ctx.config.transfer.delete_after_download || args.delete_after;
    let remote_dir = path::join(&base, &args.remote_dir);
    let result = download_dir(&session, &remote_dir, &args.local_dir, |_, _| delete_after);
    session.close()?;
    match result {
        Ok(report) => print_report(ctx, "Downloaded", &report),
        Err(SyncError::Partial(failures)) => {
            for failure in &failures {
                eprintln!("  {} {}: {}", "✗".red(), failure.remote, failure.error);
            }
            bail!("{} path(s) failed to download", failures.len())
        }
        Err(err) => Err(err.into()),
    }
}

fn cmd_rm(ctx: &Context, args: RmArgs) -> anyhow::Result<()> {
    let session = ctx.rooted_session(&args.url)?;
    for key in &args.keys {
        if args.force {
            if !delete_if_exists(&session, key)? {
                continue;
            }
        } else if session.exists(key)? {
            session.delete(key)?;
        } else {
            bail!("no such object: {key}");
        }
        println!("Deleted {}", key.yellow());
    }
    session.close()?;
    Ok(())
}

fn cmd_mv(ctx: &Context, args: MvArgs) -> anyhow::Result<()> {
    let session = ctx.rooted_session(&args.url)?;
    session.rename(&args.from, &args.to)?;
    session.close()?;
    println!("Renamed {} → {}", args.from.yellow(), args.to.yellow());
    Ok(())
}

fn cmd_cat(ctx: &Context, args: CatArgs) -> anyhow::Result<()> {
    let session = ctx.rooted_session(&args.url)?;
    let mut reader = session.open_read(&args.key)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    io::copy(&mut reader, &mut out)?;
    out.flush()?;
    reader.close()?;
    session.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::Parser;

    use super::*;

    fn run(args: &[&str]) -> anyhow::Result<()> {
        let mut argv = vec!["ferry"];
        argv.extend_from_slice(args);
        run_command(Cli::try_parse_from(argv).unwrap())
    }

    #[test]
    fn push_then_pull_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), b"alpha").unwrap();
        fs::write(src.join("nested/b.txt"), vec![7u8; 3000]).unwrap();
        let url = format!(
            "db+sqlite://{}?create_table=true",
            dir.path().join("store.db").display()
        );
        let dest = dir.path().join("dest");

        run(&["--chunk-size", "1024", "push", &url, src.to_str().unwrap(), "site"]).unwrap();
        // chunked backends list a flat namespace from the root
        run(&["pull", &url, "", dest.to_str().unwrap()]).unwrap();

        assert_eq!(fs::read(dest.join("site/a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(dest.join("site/nested/b.txt")).unwrap(), vec![7u8; 3000]);
    }

    #[test]
    fn single_file_commands_on_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let local = dir.path().join("note.txt");
        fs::write(&local, b"hello").unwrap();
        let url = root.to_str().unwrap();

        run(&["upload", url, local.to_str().unwrap(), "note.txt"]).unwrap();
        assert_eq!(fs::read(root.join("note.txt")).unwrap(), b"hello");

        run(&["mv", url, "note.txt", "renamed.txt"]).unwrap();
        let back = dir.path().join("back.txt");
        run(&["download", url, "renamed.txt", back.to_str().unwrap()]).unwrap();
        assert_eq!(fs::read(&back).unwrap(), b"hello");

        run(&["rm", url, "renamed.txt"]).unwrap();
        assert!(!root.join("renamed.txt").exists());
        assert!(run(&["rm", url, "renamed.txt"]).is_err());
        run(&["rm", "--force", url, "renamed.txt"]).unwrap();
    }

    #[test]
    fn unsupported_backend_is_an_error() {
        let err = run(&["ls", "gopher://host/dir"]).unwrap_err();
        assert!(format!("{err:#}").contains("gopher"));
    }

    #[test]
    fn entry_formatting() {
        colored::control::set_override(false);
        let line = format_entry(&ObjectInfo::file("a.bin", Some(42), None));
        assert!(line.trim_start().starts_with("42"));
        assert!(line.ends_with("a.bin"));
        let dir = format_entry(&ObjectInfo::dir("sub", None));
        assert!(dir.ends_with("sub/"));
    }
}
