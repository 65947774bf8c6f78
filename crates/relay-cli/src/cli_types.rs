use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliProvider {
    /// Offline rule engine.
    Rules,
    /// OpenAI-compatible chat completions with an API key.
    Openai,
    /// Google generateContent with an API key.
    Google,
    /// Google generateContent with OAuth2 refresh-token credentials.
    Oauth,
    /// External session host spoken to over stdio.
    Session,
}
