use crate::context::Context;
use anyhow::Context as _;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::Subcommand;
use cloudops_core::{Action, Category, OutcomeRecord, ResourceRef, plans};
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum ObjectCommands {
    /// List objects in a bucket
    List { bucket: String },
    /// Upload a local file
    Upload {
        bucket: String,
        key: String,
        file: PathBuf,
    },
    /// Download an object to a file or stdout
    Download {
        bucket: String,
        key: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Copy an object
    Copy {
        src_bucket: String,
        src_key: String,
        dst_bucket: String,
        /// Defaults to the source key
        dst_key: Option<String>,
    },
    /// Move an object (copy, then delete the source)
    Move {
        src_bucket: String,
        src_key: String,
        dst_bucket: String,
        /// Defaults to the source key
        dst_key: Option<String>,
    },
    /// Delete an object
    Delete { bucket: String, key: String },
}

pub async fn handle(ctx: &Context, cmd: ObjectCommands) -> anyhow::Result<()> {
    match cmd {
        ObjectCommands::List { bucket } => {
            let collection =
                ResourceRef::collection(Category::Object, Some(ResourceRef::bucket(&bucket)));
            let items = ctx.list(collection).await?;
            ctx.output.items(&items, &["key", "size"])
        }
        ObjectCommands::Upload { bucket, key, file } => {
            let body = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            ctx.run(
                plans::upload_object(&bucket, &key, &body),
                &format!("uploaded {} to {}/{}", file.display(), bucket, key),
            )
            .await?;
            Ok(())
        }
        ObjectCommands::Download {
            bucket,
            key,
            output,
        } => {
            let body = ctx
                .call(Action::Download, &ResourceRef::object(&bucket, &key))
                .await?;
            let encoded = body["body"].as_str().ok_or_else(|| {
                anyhow::anyhow!("download response for {}/{} has no body", bucket, key)
            })?;
            let bytes = STANDARD
                .decode(encoded)
                .context("download body is not valid base64")?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &bytes)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    eprintln!("wrote {} bytes to {}", bytes.len(), path.display());
                }
                None => std::io::stdout().write_all(&bytes)?,
            }
            Ok(())
        }
        ObjectCommands::Copy {
            src_bucket,
            src_key,
            dst_bucket,
            dst_key,
        } => {
            let dst_key = dst_key.unwrap_or_else(|| src_key.clone());
            let steps = plans::copy_object(&src_bucket, &src_key, &dst_bucket, &dst_key)?;
            let record = ctx
                .run(
                    steps,
                    &format!("copied {}/{} to {}/{}", src_bucket, src_key, dst_bucket, dst_key),
                )
                .await?;
            copy_details(ctx, &record);
            Ok(())
        }
        ObjectCommands::Move {
            src_bucket,
            src_key,
            dst_bucket,
            dst_key,
        } => {
            let dst_key = dst_key.unwrap_or_else(|| src_key.clone());
            let steps = plans::move_object(&src_bucket, &src_key, &dst_bucket, &dst_key)?;
            let record = ctx
                .run(
                    steps,
                    &format!("moved {}/{} to {}/{}", src_bucket, src_key, dst_bucket, dst_key),
                )
                .await?;
            copy_details(ctx, &record);
            Ok(())
        }
        ObjectCommands::Delete { bucket, key } => {
            ctx.run(
                plans::delete_object(&bucket, &key),
                &format!("deleted {}/{}", bucket, key),
            )
            .await?;
            Ok(())
        }
    }
}

/// Print what the remote side reported for the copy step
fn copy_details(ctx: &Context, record: &OutcomeRecord) {
    if ctx.output.is_json() {
        return;
    }
    let Some(copy) = record.completed_steps().first() else {
        return;
    };
    if let Some(etag) = copy.response["etag"].as_str() {
        println!("  etag: {}", etag.cyan());
    }
    if let Some(size) = copy.response["size"].as_u64() {
        println!("  size: {} bytes", size);
    }
}
