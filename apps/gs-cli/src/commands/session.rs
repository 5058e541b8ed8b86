// session.rs: Sign-out.

use super::Context;

pub fn sign_out(ctx: &Context) -> anyhow::Result<()> {
    ctx.engine.session().sign_out();
    ctx.engine.reset_for_sign_out();

    println!("Signed out. Cached goals discarded.");
    if ctx.config.session.is_some() {
        println!(
            "Credentials are still stored in {}; remove its [session] table to forget them.",
            ctx.config_dir.join(gs_sync::config::CONFIG_FILE).display()
        );
    }
    Ok(())
}
