//! Encryption mode commands.

use anyhow::Result;
use clap::Args;
use rekey_core::effects::EncryptionModeSource;
use rekey_core::EncryptionFunction;

use crate::context::CliContext;

#[derive(Args)]
pub struct ModeCommand {
    /// New mode (`identity` or `aescbc`); prints the current mode when omitted
    pub function: Option<EncryptionFunction>,

    /// Remove the mode setting, which reads as identity
    #[arg(long, conflicts_with = "function")]
    pub unset: bool,
}

pub async fn handle_mode_command(ctx: &CliContext, cmd: ModeCommand) -> Result<()> {
    let store = ctx.mode();
    if cmd.unset {
        store.set_mode(None).await?;
        println!("encryption mode unset (identity)");
        return Ok(());
    }
    match cmd.function {
        Some(function) => {
            store.set_mode(Some(function)).await?;
            println!("encryption mode set to {function}");
        }
        None => println!("{}", store.encryption_function().await?),
    }
    Ok(())
}
