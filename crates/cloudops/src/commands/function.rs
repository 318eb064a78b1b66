use crate::context::Context;
use anyhow::Context as _;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::Subcommand;
use cloudops_core::{Category, ResourceRef, plans};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum FunctionCommands {
    /// List functions
    List,
    /// Show one function
    Describe { name: String },
    /// Create a function from a code package
    Create {
        name: String,
        #[arg(long)]
        runtime: String,
        #[arg(long)]
        handler: String,
        /// Code package (sent base64 encoded)
        #[arg(long)]
        code_file: PathBuf,
        /// Extra configuration, KEY=VALUE (repeatable)
        #[arg(long = "set", value_parser = parse_key_val)]
        settings: Vec<(String, String)>,
    },
    /// Update configuration and/or code
    Update {
        name: String,
        /// Configuration change, KEY=VALUE (repeatable)
        #[arg(long = "set", value_parser = parse_key_val)]
        settings: Vec<(String, String)>,
        #[arg(long)]
        code_file: Option<PathBuf>,
    },
    /// Invoke a function synchronously
    Invoke {
        name: String,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
    },
    /// Delete a function
    Delete { name: String },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn read_code(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read code package {}", path.display()))?;
    Ok(STANDARD.encode(bytes))
}

pub async fn handle(ctx: &Context, cmd: FunctionCommands) -> anyhow::Result<()> {
    match cmd {
        FunctionCommands::List => {
            let items = ctx
                .list(ResourceRef::collection(Category::Function, None))
                .await?;
            ctx.output.items(&items, &["name", "state", "version"])
        }
        FunctionCommands::Describe { name } => {
            let body = ctx.describe(&ResourceRef::function(&name)).await?;
            ctx.output.value(&body)
        }
        FunctionCommands::Create {
            name,
            runtime,
            handler,
            code_file,
            settings,
        } => {
            let mut configuration: BTreeMap<String, String> = settings.into_iter().collect();
            configuration.insert("runtime".to_string(), runtime);
            configuration.insert("handler".to_string(), handler);
            let code = read_code(&code_file)?;

            ctx.run(
                plans::create_function(&name, &configuration, &code),
                &format!("function {} created", name),
            )
            .await?;
            Ok(())
        }
        FunctionCommands::Update {
            name,
            settings,
            code_file,
        } => {
            let configuration: BTreeMap<String, String> = settings.into_iter().collect();
            let code = code_file.as_deref().map(read_code).transpose()?;
            let steps = plans::update_function(&name, &configuration, code.as_deref());
            if steps.is_empty() {
                anyhow::bail!("nothing to update: pass --set and/or --code-file");
            }

            ctx.run(steps, &format!("function {} updated", name)).await?;
            Ok(())
        }
        FunctionCommands::Invoke { name, payload } => {
            let record = ctx
                .run(
                    plans::invoke_function(&name, payload.as_deref()),
                    &format!("function {} invoked", name),
                )
                .await?;
            if !ctx.output.is_json() {
                if let Some(response) = record.last_response() {
                    ctx.output.value(response)?;
                }
            }
            Ok(())
        }
        FunctionCommands::Delete { name } => {
            ctx.run(plans::delete_function(&name), &format!("function {} deleted", name))
                .await?;
            Ok(())
        }
    }
}
