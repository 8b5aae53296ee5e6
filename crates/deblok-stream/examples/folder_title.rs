use deblok_stream::prelude::*;
use deblok_stream::vendors::openai::OpenAiClient;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), DeblokError> {
    let client = OpenAiClient::from_env()?;
    let title = client
        .generate_title(
            &TitleRequest::new("Mon vélo grince quand je freine")
                .ai_text("Vérifie les patins et nettoie la jante."),
        )
        .await?;
    println!("{title}");
    Ok(())
}
