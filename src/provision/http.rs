use super::{
    client::{FunctionDirectory, FunctionInvoker},
    models::ListFunctionsResp,
};
use crate::error::ProvisionError;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use tracing::debug;

// header set by the function gateway when the function itself threw
const FUNCTION_ERROR_HEADER: &str = "X-Amz-Function-Error";
const MAX_LIST_PAGES: usize = 100;
const DIRECTORY: &str = "<function directory>";

/// Function gateway speaking the Lambda-style REST paths:
/// `GET {base}/functions` and `POST {base}/functions/{name}/invocations`.
pub struct HttpFunctionGateway {
    client:     Client,
    base_url:   String,
    auth_token: Option<String>,
    timeout:    Duration,
}

fn remote(function: &str, reason: impl ToString) -> ProvisionError {
    ProvisionError::RemoteInvocation {
        function: function.to_owned(),
        reason: reason.to_string(),
    }
}

impl HttpFunctionGateway {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        auth_token: Option<String>,
    ) -> Result<Self, ProvisionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| remote(DIRECTORY, e))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            auth_token,
            timeout,
        })
    }

    pub fn functions_url(&self) -> String {
        format!("{}/functions", self.base_url)
    }

    pub fn invocation_url(&self, function: &str) -> String {
        format!("{}/functions/{}/invocations", self.base_url, function)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None        => req,
        }
    }

    fn describe(&self, e: reqwest::Error) -> String {
        if e.is_timeout() {
            format!("timed out after {:?}", self.timeout)
        } else if e.is_connect() {
            format!("could not connect: {e}")
        } else {
            e.to_string()
        }
    }
}

#[async_trait]
impl FunctionDirectory for HttpFunctionGateway {
    async fn list_functions(&self) -> Result<Vec<String>, ProvisionError> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let mut req = self.client.get(self.functions_url());
            if let Some(m) = &marker {
                req = req.query(&[("Marker", m)]);
            }
            let resp = self
                .authorize(req)
                .send()
                .await
                .map_err(|e| remote(DIRECTORY, self.describe(e)))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(remote(DIRECTORY, format!("HTTP {status}: {body}")));
            }
            let page: ListFunctionsResp = resp
                .json()
                .await
                .map_err(|e| remote(DIRECTORY, format!("decoding function list: {e}")))?;

            names.extend(page.functions.into_iter().map(|f| f.function_name));
            match page.next_marker.filter(|m| !m.is_empty()) {
                Some(next) => marker = Some(next),
                None       => return Ok(names),
            }
        }

        debug!(pages = MAX_LIST_PAGES, "function listing truncated");
        Ok(names)
    }
}

#[async_trait]
impl FunctionInvoker for HttpFunctionGateway {
    async fn invoke(&self, function: &str, payload: Vec<u8>) -> Result<Vec<u8>, ProvisionError> {
        debug!(function, url = %self.invocation_url(function), "invoking function");
        let req = self
            .client
            .post(self.invocation_url(function))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload);

        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| remote(function, self.describe(e)))?;

        let status = resp.status();
        let function_error = resp
            .headers()
            .get(FUNCTION_ERROR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = resp
            .bytes()
            .await
            .map_err(|e| remote(function, self.describe(e)))?;

        if !status.is_success() {
            return Err(remote(
                function,
                format!("HTTP {status}: {}", String::from_utf8_lossy(&body)),
            ));
        }
        if let Some(kind) = function_error {
            return Err(remote(
                function,
                format!("function error ({kind}): {}", String::from_utf8_lossy(&body)),
            ));
        }
        Ok(body.to_vec())
    }
}
