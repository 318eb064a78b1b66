use crate::context::Context;
use clap::Subcommand;
use cloudops_core::{Action, Category, ResourceRef, WaitSpec, plans, wait_for_state};
use colored::Colorize;
use serde_json::json;
use std::time::Duration;

#[derive(Subcommand)]
pub enum InstanceCommands {
    /// List instances
    List,
    /// Show one instance
    Describe { id: String },
    /// Launch an instance and tag it with a name
    Create {
        #[arg(long)]
        image: String,
        #[arg(long = "type", default_value = "small")]
        instance_type: String,
        #[arg(long)]
        name: String,
        /// Wait until the instance is running
        #[arg(long)]
        wait: bool,
    },
    /// Start a stopped instance
    Start {
        id: String,
        #[arg(long)]
        wait: bool,
    },
    /// Stop a running instance
    Stop {
        id: String,
        #[arg(long)]
        wait: bool,
    },
    /// Reboot an instance
    Reboot {
        id: String,
        #[arg(long)]
        wait: bool,
    },
    /// Terminate an instance
    Terminate {
        id: String,
        #[arg(long)]
        wait: bool,
    },
    /// Wait until an instance reaches one of the given states
    Wait {
        id: String,
        /// Desired state (repeatable)
        #[arg(long = "state", required = true)]
        states: Vec<String>,
        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Seconds between polls
        #[arg(long)]
        interval: Option<u64>,
    },
}

pub async fn handle(ctx: &Context, cmd: InstanceCommands) -> anyhow::Result<()> {
    match cmd {
        InstanceCommands::List => {
            let items = ctx
                .list(ResourceRef::collection(Category::Instance, None))
                .await?;
            ctx.output.items(&items, &["id", "state", "type", "tags.Name"])
        }
        InstanceCommands::Describe { id } => {
            let body = ctx.describe(&ResourceRef::instance(&id)).await?;
            ctx.output.value(&body)
        }
        InstanceCommands::Create {
            image,
            instance_type,
            name,
            wait,
        } => {
            let record = ctx
                .run(
                    plans::create_instance(&image, &instance_type, &name, wait),
                    &format!("instance {} created", name),
                )
                .await?;
            if !ctx.output.is_json() {
                let created = record.completed_steps().first().map(|c| &c.response);
                if let Some(id) = created.and_then(|body| body["id"].as_str()) {
                    println!("  id: {}", id.cyan());
                }
            }
            Ok(())
        }
        InstanceCommands::Start { id, wait } => {
            lifecycle(ctx, Action::Start, &id, wait, "started").await
        }
        InstanceCommands::Stop { id, wait } => {
            lifecycle(ctx, Action::Stop, &id, wait, "stopped").await
        }
        InstanceCommands::Reboot { id, wait } => {
            lifecycle(ctx, Action::Reboot, &id, wait, "rebooted").await
        }
        InstanceCommands::Terminate { id, wait } => {
            lifecycle(ctx, Action::Terminate, &id, wait, "terminated").await
        }
        InstanceCommands::Wait {
            id,
            states,
            timeout,
            interval,
        } => {
            let target = ResourceRef::instance(&id);
            let spec = WaitSpec::new(
                target.clone(),
                states,
                interval.map_or(ctx.config.wait.poll_interval(), Duration::from_secs),
                timeout.map_or(ctx.config.wait.timeout(), Duration::from_secs),
            )?;
            let observed = wait_for_state(ctx.client(&target)?, &spec, &ctx.cancel).await?;

            if ctx.output.is_json() {
                ctx.output.value(&json!({
                    "id": id,
                    "state": observed.state,
                    "polls": observed.polls,
                    "elapsedSecs": observed.elapsed.as_secs_f64(),
                }))
            } else {
                println!(
                    "{}",
                    format!(
                        "✓ {} is {} ({} polls, {:.1}s)",
                        id,
                        observed.state,
                        observed.polls,
                        observed.elapsed.as_secs_f64()
                    )
                    .green()
                    .bold()
                );
                Ok(())
            }
        }
    }
}

async fn lifecycle(
    ctx: &Context,
    action: Action,
    id: &str,
    wait: bool,
    done: &str,
) -> anyhow::Result<()> {
    ctx.run(
        plans::instance_action(action, id, wait),
        &format!("instance {} {}", id, done),
    )
    .await?;
    Ok(())
}
