use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("failed to build backend http client"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("backend request to {url} failed on `{stage}`, {source}"))]
    Transport {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("backend returned status {status} for {url}: {body}"))]
    UnexpectedStatus {
        stage: &'static str,
        url: String,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode backend payload from {url}"))]
    DecodePayload {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
}

pub type BackendResult<T> = Result<T, BackendError>;
