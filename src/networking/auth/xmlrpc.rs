//! XML-RPC client for the login endpoint
//!
//! `ureq` is synchronous, so requests run on the blocking pool. Responses
//! are walked with `roxmltree`; values are escaped on the way out with
//! `quick-xml`.

use super::types::{LoginParams, LoginResponse};
use crate::config::NetworkSettings;
use crate::utils::math::{parsing as math_parsing, Vector3};
use anyhow::{Context, Result};
use quick_xml::escape::escape;
use roxmltree::Document;
use std::time::Duration;
use ureq::tls::TlsConfig;
use ureq::Agent;

/// Method name of the initial login call; redirects may substitute another
pub const LOGIN_METHOD: &str = "login_to_simulator";

pub struct XmlRpcClient {
    agent: Agent,
}

impl XmlRpcClient {
    pub fn new(settings: &NetworkSettings) -> Self {
        let user_agent = format!("gridlink/{}", env!("CARGO_PKG_VERSION"));
        let timeout = Duration::from_millis(settings.login_timeout_ms);

        let agent: Agent = if settings.insecure_tls {
            tracing::warn!("TLS certificate verification disabled for login");
            let tls_config = TlsConfig::builder().disable_verification(true).build();
            Agent::config_builder()
                .tls_config(tls_config)
                .timeout_global(Some(timeout))
                .user_agent(user_agent)
                .build()
                .into()
        } else {
            Agent::config_builder()
                .timeout_global(Some(timeout))
                .user_agent(user_agent)
                .build()
                .into()
        };

        Self { agent }
    }

    /// POST a login call and parse the response struct. `method` is
    /// normally [`LOGIN_METHOD`]; redirects can name a different one.
    pub async fn login_to_simulator(
        &self,
        url: &str,
        method: &str,
        params: &LoginParams,
    ) -> Result<LoginResponse> {
        let xml_request = build_login_request(method, params);
        let url = url.to_string();
        let agent = self.agent.clone();

        tracing::info!(
            url,
            method,
            user = format!("{} {}", params.first_name, params.last_name),
            "sending login request"
        );
        tracing::debug!("XML-RPC request body:\n{}", xml_request);

        let (status_code, xml_body) =
            tokio::task::spawn_blocking(move || -> Result<(u16, String)> {
                let mut response = agent
                    .post(&url)
                    .header("Content-Type", "text/xml")
                    .send(&xml_request)
                    .map_err(|e| anyhow::anyhow!("login transport error: {}", e))?;

                let status_code = response.status();
                let xml_body = response
                    .body_mut()
                    .read_to_string()
                    .context("Failed to read login response")?;

                Ok((status_code.into(), xml_body))
            })
            .await
            .context("Login request task failed")??;

        tracing::debug!("XML-RPC response body:\n{}", xml_body);

        if !(200..300).contains(&status_code) {
            anyhow::bail!("login request failed with HTTP status {}", status_code);
        }

        parse_login_response(&xml_body)
    }
}

fn build_login_request(method: &str, params: &LoginParams) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\"?>\n");
    xml.push_str("<methodCall>\n");
    xml.push_str(&format!("  <methodName>{}</methodName>\n", escape(method)));
    xml.push_str("  <params>\n");
    xml.push_str("    <param>\n");
    xml.push_str("      <value>\n");
    xml.push_str("        <struct>\n");

    add_int_member(&mut xml, "agree_to_tos", params.agree_to_tos as u32);
    add_member(&mut xml, "channel", &params.channel);
    add_member(&mut xml, "first", &params.first_name);
    add_member(&mut xml, "id0", &params.machine_id);
    add_member(&mut xml, "last", &params.last_name);
    add_member(&mut xml, "mac", &params.mac_address);
    add_member(
        &mut xml,
        "passwd",
        &LoginParams::hash_password(&params.password),
    );
    add_member(&mut xml, "platform", &params.platform);
    add_int_member(&mut xml, "read_critical", params.read_critical as u32);
    add_member(&mut xml, "start", &params.start_location);
    add_member(&mut xml, "version", &params.version);

    xml.push_str("          <member>\n");
    xml.push_str("            <name>options</name>\n");
    xml.push_str("            <value>\n");
    xml.push_str("              <array>\n");
    xml.push_str("                <data>\n");
    for option in &params.options {
        xml.push_str(&format!(
            "                  <value><string>{}</string></value>\n",
            escape(option.as_str())
        ));
    }
    xml.push_str("                </data>\n");
    xml.push_str("              </array>\n");
    xml.push_str("            </value>\n");
    xml.push_str("          </member>\n");

    xml.push_str("        </struct>\n");
    xml.push_str("      </value>\n");
    xml.push_str("    </param>\n");
    xml.push_str("  </params>\n");
    xml.push_str("</methodCall>\n");

    xml
}

fn add_member(xml: &mut String, name: &str, value: &str) {
    xml.push_str(&format!(
        "          <member>\n            <name>{}</name>\n            <value><string>{}</string></value>\n          </member>\n",
        name,
        escape(value)
    ));
}

fn add_int_member(xml: &mut String, name: &str, value: u32) {
    xml.push_str(&format!(
        "          <member>\n            <name>{}</name>\n            <value><int>{}</int></value>\n          </member>\n",
        name, value
    ));
}

fn parse_login_response(xml: &str) -> Result<LoginResponse> {
    let doc = Document::parse(xml).context("Failed to parse XML response")?;
    let root = doc.root_element();

    let method_response = if root.tag_name().name() == "methodResponse" {
        root
    } else {
        root.children()
            .find(|n| n.tag_name().name() == "methodResponse")
            .context("No methodResponse found")?
    };

    if method_response
        .children()
        .any(|n| n.tag_name().name() == "fault")
    {
        anyhow::bail!("login fault response received");
    }

    let struct_elem = method_response
        .children()
        .find(|n| n.tag_name().name() == "params")
        .and_then(|params| params.children().find(|n| n.tag_name().name() == "param"))
        .and_then(|param| param.children().find(|n| n.tag_name().name() == "value"))
        .and_then(|value| value.children().find(|n| n.tag_name().name() == "struct"))
        .context("No response struct found")?;

    let mut response = LoginResponse::default();
    for member in struct_elem
        .children()
        .filter(|n| n.tag_name().name() == "member")
    {
        let name = member
            .children()
            .find(|n| n.tag_name().name() == "name")
            .and_then(|n| n.text());
        let value_node = member.children().find(|n| n.tag_name().name() == "value");

        if let (Some(name), Some(value_node)) = (name, value_node) {
            let value = extract_value_text(value_node);
            set_response_field(&mut response, name, &value)?;
        }
    }

    Ok(response)
}

fn extract_value_text(value_node: roxmltree::Node) -> String {
    for scalar in ["string", "boolean", "int", "i4", "double"] {
        if let Some(node) = value_node
            .children()
            .find(|n| n.tag_name().name() == scalar)
        {
            return node.text().unwrap_or("").to_string();
        }
    }
    if let Some(array_node) = value_node
        .children()
        .find(|n| n.tag_name().name() == "array")
    {
        let mut values = Vec::new();
        for data_node in array_node
            .children()
            .filter(|n| n.tag_name().name() == "data")
        {
            for value_node in data_node
                .children()
                .filter(|n| n.tag_name().name() == "value")
            {
                let text = extract_value_text(value_node);
                if !text.is_empty() {
                    values.push(text);
                }
            }
        }
        return values.join(",");
    }
    value_node.text().unwrap_or("").trim().to_string()
}

fn set_response_field(response: &mut LoginResponse, name: &str, value: &str) -> Result<()> {
    match name {
        "login" => match value {
            "true" => response.success = true,
            "indeterminate" => response.indeterminate = true,
            _ => {}
        },
        "agent_id" => {
            response.agent_id = math_parsing::parse_uuid(value)
                .map_err(|e| anyhow::anyhow!("invalid agent_id: {}", e))?;
        }
        "session_id" => {
            response.session_id = math_parsing::parse_uuid(value)
                .map_err(|e| anyhow::anyhow!("invalid session_id: {}", e))?;
        }
        "secure_session_id" => {
            response.secure_session_id = math_parsing::parse_uuid(value)
                .map_err(|e| anyhow::anyhow!("invalid secure_session_id: {}", e))?;
        }
        "first_name" => {
            // the server quotes first names
            response.first_name = value.trim_matches('"').to_string();
        }
        "last_name" => {
            response.last_name = value.to_string();
        }
        "circuit_code" => {
            response.circuit_code = value.parse().context("invalid circuit_code")?;
        }
        "sim_ip" => {
            response.sim_ip = value.to_string();
        }
        "sim_port" => {
            response.sim_port = value.parse().context("invalid sim_port")?;
        }
        "look_at" => {
            response.look_at = Vector3::parse_grid_format(value)
                .map_err(|e| anyhow::anyhow!("invalid look_at: {}", e))?;
        }
        "seed_capability" => {
            response.seed_capability = Some(value.to_string());
        }
        "message" => {
            response.message = Some(value.to_string());
        }
        "reason" => {
            response.reason = Some(value.to_string());
        }
        "next_url" => {
            response.next_url = Some(value.to_string());
        }
        "next_method" => {
            response.next_method = Some(value.to_string());
        }
        "udp_blacklist" => {
            response.udp_blacklist = Some(math_parsing::parse_string_array(value));
        }
        "home" => {
            response.home = Some(value.to_string());
        }
        "inventory_root" => {
            response.inventory_root = Some(value.to_string());
        }
        "map-server-url" | "map_server_url" => {
            response.map_server_url = Some(value.to_string());
        }
        "seconds_since_epoch" => {
            response.seconds_since_epoch = value.parse().ok();
        }
        _ => {
            tracing::debug!("unhandled login response field: {} = {}", name, value);
        }
    }
    Ok(())
}
