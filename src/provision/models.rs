use serde::{Serialize, Deserialize};

// payload the provisioning function expects, nothing more
#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionReq {
    pub thing_name: String,
    pub user_id:    String,
}

#[derive(Deserialize, Debug)]
pub struct FunctionSummary {
    #[serde(rename = "FunctionName")]
    pub function_name: String,
}

// one page of `GET /functions`
#[derive(Deserialize, Debug)]
pub struct ListFunctionsResp {
    #[serde(rename = "Functions", default)]
    pub functions:   Vec<FunctionSummary>,
    #[serde(rename = "NextMarker", default)]
    pub next_marker: Option<String>,
}

/// The provisioning function picked at startup. Passed into the client,
/// never looked up again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedFunction {
    pub name: String,
}
