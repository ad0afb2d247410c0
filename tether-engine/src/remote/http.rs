//! HTTP implementation of the remote API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{
    AccessRole, AlertConfig, CloudUser, Container, EndpointService, InterfaceEndpoint,
    InterfaceRequest, Page, PageRequest, Peer, ProjectTeam, RoleDefinition, Team,
};
use super::{AlertConfigApi, CloudAccessApi, CustomRoleApi, PeeringApi, PrivateEndpointApi, TeamApi};
use crate::error::{ApiError, ApiResult};
use crate::provider::ProviderName;

const MEDIA_TYPE: &str = "application/json";

/// Error body returned by the API on non-success responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: String,
}

/// Map a non-success response to an [`ApiError`].
pub fn classify(status: StatusCode, body: &str) -> ApiError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|b| b.detail)
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| body.to_string());
    match status {
        StatusCode::NOT_FOUND => ApiError::NotFound(message),
        StatusCode::CONFLICT => ApiError::Conflict(message),
        StatusCode::BAD_REQUEST => ApiError::BadRequest(message),
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => {
            ApiError::Unsupported(message)
        }
        StatusCode::TOO_MANY_REQUESTS => ApiError::Transient(message),
        s if s.is_server_error() => ApiError::Transient(message),
        s => ApiError::Unexpected {
            status: s.as_u16(),
            message,
        },
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_decode() {
        ApiError::Decode(err.to_string())
    } else {
        ApiError::Transient(err.to_string())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateServiceRequest<'a> {
    provider_name: ProviderName,
    region: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessRoleRequest<'a> {
    provider_name: ProviderName,
    #[serde(skip_serializing_if = "Option::is_none")]
    iam_assumed_role_arn: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessRoleListing {
    #[serde(default)]
    aws_iam_roles: Vec<AccessRole>,
    #[serde(default)]
    azure_service_principals: Vec<AccessRole>,
}

#[derive(Debug, Serialize)]
struct TeamRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct UserRef<'a> {
    id: &'a str,
}

/// Client for the remote control-plane REST API.
pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpRemote {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);
        let req = self.client.request(method, url).header(ACCEPT, MEDIA_TYPE);
        if self.token.is_empty() {
            req
        } else {
            req.bearer_auth(&self.token)
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> ApiResult<T> {
        let response = req.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn send_empty(&self, req: RequestBuilder) -> ApiResult<()> {
        let response = req.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.send(self.request(Method::GET, path)).await
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        page: PageRequest,
        extra: &[(&str, &str)],
    ) -> ApiResult<Page<T>> {
        let page_num = page.page_num.to_string();
        let items_per_page = page.items_per_page.to_string();
        let req = self
            .request(Method::GET, path)
            .query(&[("pageNum", page_num.as_str()), ("itemsPerPage", items_per_page.as_str())])
            .query(extra);
        self.send(req).await
    }

    async fn write<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        self.send(self.request(method, path).json(body)).await
    }

    async fn delete(&self, path: &str) -> ApiResult<()> {
        self.send_empty(self.request(Method::DELETE, path)).await
    }
}

#[async_trait]
impl PeeringApi for HttpRemote {
    async fn list_peers(
        &self,
        project_id: &str,
        provider: ProviderName,
        page: PageRequest,
    ) -> ApiResult<Page<Peer>> {
        let path = format!("/groups/{project_id}/peers");
        let mut listing: Page<Peer> = self
            .get_page(&path, page, &[("providerName", provider.as_str())])
            .await?;
        for peer in &mut listing.results {
            peer.provider_name.get_or_insert(provider);
        }
        Ok(listing)
    }

    async fn create_peer(&self, project_id: &str, peer: &Peer) -> ApiResult<Peer> {
        let path = format!("/groups/{project_id}/peers");
        self.write(Method::POST, &path, peer).await
    }

    async fn delete_peer(&self, project_id: &str, peer_id: &str) -> ApiResult<()> {
        self.delete(&format!("/groups/{project_id}/peers/{peer_id}"))
            .await
    }

    async fn list_containers(
        &self,
        project_id: &str,
        provider: ProviderName,
        page: PageRequest,
    ) -> ApiResult<Page<Container>> {
        let path = format!("/groups/{project_id}/containers");
        self.get_page(&path, page, &[("providerName", provider.as_str())])
            .await
    }

    async fn get_container(&self, project_id: &str, container_id: &str) -> ApiResult<Container> {
        self.get(&format!("/groups/{project_id}/containers/{container_id}"))
            .await
    }

    async fn create_container(
        &self,
        project_id: &str,
        container: &Container,
    ) -> ApiResult<Container> {
        let path = format!("/groups/{project_id}/containers");
        self.write(Method::POST, &path, container).await
    }

    async fn delete_container(&self, project_id: &str, container_id: &str) -> ApiResult<()> {
        self.delete(&format!("/groups/{project_id}/containers/{container_id}"))
            .await
    }
}

#[async_trait]
impl PrivateEndpointApi for HttpRemote {
    async fn list_endpoint_services(
        &self,
        project_id: &str,
        provider: ProviderName,
    ) -> ApiResult<Vec<EndpointService>> {
        let path = format!("/groups/{project_id}/privateEndpoint/{provider}/endpointService");
        let mut services: Vec<EndpointService> = self.get(&path).await?;
        for service in &mut services {
            service.provider_name = provider;
        }
        Ok(services)
    }

    async fn create_endpoint_service(
        &self,
        project_id: &str,
        provider: ProviderName,
        region: &str,
    ) -> ApiResult<EndpointService> {
        let path = format!("/groups/{project_id}/privateEndpoint/endpointService");
        let body = CreateServiceRequest {
            provider_name: provider,
            region,
        };
        let mut service: EndpointService = self.write(Method::POST, &path, &body).await?;
        service.provider_name = provider;
        Ok(service)
    }

    async fn delete_endpoint_service(
        &self,
        project_id: &str,
        provider: ProviderName,
        service_id: &str,
    ) -> ApiResult<()> {
        self.delete(&format!(
            "/groups/{project_id}/privateEndpoint/{provider}/endpointService/{service_id}"
        ))
        .await
    }

    async fn create_interface_endpoint(
        &self,
        project_id: &str,
        provider: ProviderName,
        service_id: &str,
        request: &InterfaceRequest,
    ) -> ApiResult<InterfaceEndpoint> {
        let path = format!(
            "/groups/{project_id}/privateEndpoint/{provider}/endpointService/{service_id}/endpoint"
        );
        self.write(Method::POST, &path, request).await
    }

    async fn get_interface_endpoint(
        &self,
        project_id: &str,
        provider: ProviderName,
        service_id: &str,
        interface_id: &str,
    ) -> ApiResult<InterfaceEndpoint> {
        self.get(&format!(
            "/groups/{project_id}/privateEndpoint/{provider}/endpointService/{service_id}/endpoint/{interface_id}"
        ))
        .await
    }

    async fn delete_interface_endpoint(
        &self,
        project_id: &str,
        provider: ProviderName,
        service_id: &str,
        interface_id: &str,
    ) -> ApiResult<()> {
        self.delete(&format!(
            "/groups/{project_id}/privateEndpoint/{provider}/endpointService/{service_id}/endpoint/{interface_id}"
        ))
        .await
    }
}

#[async_trait]
impl CloudAccessApi for HttpRemote {
    async fn list_access_roles(&self, project_id: &str) -> ApiResult<Vec<AccessRole>> {
        let listing: AccessRoleListing = self
            .get(&format!("/groups/{project_id}/cloudProviderAccess"))
            .await?;
        Ok(listing
            .aws_iam_roles
            .into_iter()
            .chain(listing.azure_service_principals)
            .collect())
    }

    async fn create_access_role(
        &self,
        project_id: &str,
        provider: ProviderName,
    ) -> ApiResult<AccessRole> {
        let body = AccessRoleRequest {
            provider_name: provider,
            iam_assumed_role_arn: None,
        };
        self.write(
            Method::POST,
            &format!("/groups/{project_id}/cloudProviderAccess"),
            &body,
        )
        .await
    }

    async fn authorize_access_role(
        &self,
        project_id: &str,
        role_id: &str,
        provider: ProviderName,
        iam_assumed_role_arn: &str,
    ) -> ApiResult<AccessRole> {
        let body = AccessRoleRequest {
            provider_name: provider,
            iam_assumed_role_arn: Some(iam_assumed_role_arn),
        };
        self.write(
            Method::PATCH,
            &format!("/groups/{project_id}/cloudProviderAccess/{role_id}"),
            &body,
        )
        .await
    }

    async fn deauthorize_access_role(
        &self,
        project_id: &str,
        provider: ProviderName,
        role_id: &str,
    ) -> ApiResult<()> {
        self.delete(&format!(
            "/groups/{project_id}/cloudProviderAccess/{provider}/{role_id}"
        ))
        .await
    }
}

#[async_trait]
impl CustomRoleApi for HttpRemote {
    async fn list_custom_roles(&self, project_id: &str) -> ApiResult<Vec<RoleDefinition>> {
        self.get(&format!("/groups/{project_id}/customDBRoles/roles"))
            .await
    }

    async fn create_custom_role(
        &self,
        project_id: &str,
        role: &RoleDefinition,
    ) -> ApiResult<RoleDefinition> {
        self.write(
            Method::POST,
            &format!("/groups/{project_id}/customDBRoles/roles"),
            role,
        )
        .await
    }

    async fn update_custom_role(
        &self,
        project_id: &str,
        role: &RoleDefinition,
    ) -> ApiResult<RoleDefinition> {
        let path = format!("/groups/{project_id}/customDBRoles/roles/{}", role.role_name);
        self.write(Method::PATCH, &path, role).await
    }

    async fn delete_custom_role(&self, project_id: &str, role_name: &str) -> ApiResult<()> {
        self.delete(&format!("/groups/{project_id}/customDBRoles/roles/{role_name}"))
            .await
    }
}

#[async_trait]
impl AlertConfigApi for HttpRemote {
    async fn list_alert_configs(
        &self,
        project_id: &str,
        page: PageRequest,
    ) -> ApiResult<Page<AlertConfig>> {
        self.get_page(&format!("/groups/{project_id}/alertConfigs"), page, &[])
            .await
    }

    async fn create_alert_config(
        &self,
        project_id: &str,
        config: &AlertConfig,
    ) -> ApiResult<AlertConfig> {
        self.write(
            Method::POST,
            &format!("/groups/{project_id}/alertConfigs"),
            config,
        )
        .await
    }

    async fn update_alert_config(
        &self,
        project_id: &str,
        config_id: &str,
        config: &AlertConfig,
    ) -> ApiResult<AlertConfig> {
        self.write(
            Method::PUT,
            &format!("/groups/{project_id}/alertConfigs/{config_id}"),
            config,
        )
        .await
    }

    async fn delete_alert_config(&self, project_id: &str, config_id: &str) -> ApiResult<()> {
        self.delete(&format!("/groups/{project_id}/alertConfigs/{config_id}"))
            .await
    }
}

#[async_trait]
impl TeamApi for HttpRemote {
    async fn get_team_by_name(&self, org_id: &str, name: &str) -> ApiResult<Team> {
        self.get(&format!("/orgs/{org_id}/teams/byName/{name}")).await
    }

    async fn create_team(&self, org_id: &str, name: &str) -> ApiResult<Team> {
        self.write(
            Method::POST,
            &format!("/orgs/{org_id}/teams"),
            &TeamRequest { name },
        )
        .await
    }

    async fn list_team_users(
        &self,
        org_id: &str,
        team_id: &str,
        page: PageRequest,
    ) -> ApiResult<Page<CloudUser>> {
        self.get_page(&format!("/orgs/{org_id}/teams/{team_id}/users"), page, &[])
            .await
    }

    async fn get_user_by_name(&self, username: &str) -> ApiResult<CloudUser> {
        self.get(&format!("/users/byName/{username}")).await
    }

    async fn add_team_users(&self, org_id: &str, team_id: &str, user_ids: &[String]) -> ApiResult<()> {
        let body: Vec<UserRef<'_>> = user_ids.iter().map(|id| UserRef { id }).collect();
        let req = self
            .request(Method::POST, &format!("/orgs/{org_id}/teams/{team_id}/users"))
            .json(&body);
        self.send_empty(req).await
    }

    async fn remove_team_user(&self, org_id: &str, team_id: &str, user_id: &str) -> ApiResult<()> {
        self.delete(&format!("/orgs/{org_id}/teams/{team_id}/users/{user_id}"))
            .await
    }

    async fn list_project_teams(
        &self,
        project_id: &str,
        page: PageRequest,
    ) -> ApiResult<Page<ProjectTeam>> {
        self.get_page(&format!("/groups/{project_id}/teams"), page, &[])
            .await
    }

    async fn assign_project_teams(&self, project_id: &str, teams: &[ProjectTeam]) -> ApiResult<()> {
        let req = self
            .request(Method::POST, &format!("/groups/{project_id}/teams"))
            .json(teams);
        self.send_empty(req).await
    }

    async fn unassign_project_team(&self, project_id: &str, team_id: &str) -> ApiResult<()> {
        self.delete(&format!("/groups/{project_id}/teams/{team_id}"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status_codes() {
        assert_eq!(
            classify(StatusCode::NOT_FOUND, r#"{"detail":"no such peer"}"#),
            ApiError::NotFound("no such peer".to_string())
        );
        assert!(classify(StatusCode::CONFLICT, "").is_conflict());
        assert!(matches!(
            classify(StatusCode::NOT_IMPLEMENTED, ""),
            ApiError::Unsupported(_)
        ));
        assert!(matches!(
            classify(StatusCode::SERVICE_UNAVAILABLE, "down"),
            ApiError::Transient(_)
        ));
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            ApiError::Transient(_)
        ));
        assert_eq!(
            classify(StatusCode::FORBIDDEN, "nope"),
            ApiError::Unexpected {
                status: 403,
                message: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let remote = HttpRemote::new("https://api.example.com/v2/", "t", Duration::from_secs(5)).unwrap();
        assert_eq!(remote.base_url, "https://api.example.com/v2");
    }
}
