use std::io::Write as _;
use std::sync::Arc;

use deblok_stream::prelude::*;
use deblok_stream::vendors::openai::DirectTransport;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), DeblokError> {
    init_observability();
    let transport = Arc::new(DirectTransport::from_env()?);
    let mut session = ChatSession::new(transport, SessionOptions::default())?;

    let mut turn = session.start_turn("Donne-moi trois idées de dîner rapide.")?;
    while let Some(event) = turn.next_event().await {
        match event {
            TurnEvent::Delta { text, .. } => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            TurnEvent::Finished { outcome, .. } => match outcome {
                TurnOutcome::Failed { error, .. } => eprintln!("\nturn failed: {error}"),
                _ => println!(),
            },
        }
    }

    let outcome = turn.finish().await?;
    eprintln!("phase: {:?}", outcome.phase());
    Ok(())
}
