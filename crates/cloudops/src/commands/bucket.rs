use crate::context::Context;
use clap::Subcommand;
use cloudops_core::{Category, ResourceRef, plans};
use colored::Colorize;
use serde_json::{Value, json};

#[derive(Subcommand)]
pub enum BucketCommands {
    /// List buckets
    List {
        /// Also list the objects in every bucket
        #[arg(long)]
        objects: bool,
    },
    /// Create a bucket and wait until it is available
    Create { name: String },
    /// Delete an empty bucket
    Delete { name: String },
}

pub async fn handle(ctx: &Context, cmd: BucketCommands) -> anyhow::Result<()> {
    match cmd {
        BucketCommands::List { objects } => {
            let buckets = ctx
                .list(ResourceRef::collection(Category::Bucket, None))
                .await?;
            if objects {
                list_with_objects(ctx, &buckets).await
            } else {
                ctx.output.items(&buckets, &["name", "state"])
            }
        }
        BucketCommands::Create { name } => {
            let record = ctx
                .run(plans::create_bucket(&name), &format!("bucket {} created", name))
                .await?;
            if !ctx.output.is_json() {
                let created = record.completed_steps().first().map(|c| &c.response);
                if let Some(location) = created.and_then(|body| body["location"].as_str()) {
                    println!("  location: {}", location.cyan());
                }
            }
            Ok(())
        }
        BucketCommands::Delete { name } => {
            ctx.run(plans::delete_bucket(&name), &format!("bucket {} deleted", name))
                .await?;
            Ok(())
        }
    }
}

/// One object listing per bucket, each drained page by page
async fn list_with_objects(ctx: &Context, buckets: &[Value]) -> anyhow::Result<()> {
    let mut listing = Vec::new();
    for name in buckets.iter().filter_map(|b| b["name"].as_str()) {
        let collection =
            ResourceRef::collection(Category::Object, Some(ResourceRef::bucket(name)));
        let objects = ctx.list(collection).await?;
        tracing::debug!(bucket = name, count = objects.len(), "listed bucket contents");
        listing.push((name.to_string(), objects));
    }

    if ctx.output.is_json() {
        let report = listing
            .into_iter()
            .map(|(name, objects)| json!({ "name": name, "objects": objects }))
            .collect();
        return ctx.output.value(&Value::Array(report));
    }

    for (name, objects) in listing {
        println!("{}", name.bold());
        ctx.output.items(&objects, &["key", "size"])?;
    }
    Ok(())
}
