//! Cloud provider enumeration and cloud-spec key constants

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported cloud providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Aws,
    Gce,
    DigitalOcean,
    Packet,
    OpenStack,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Aws => "aws",
            Provider::Gce => "gce",
            Provider::DigitalOcean => "digitalocean",
            Provider::Packet => "packet",
            Provider::OpenStack => "openstack",
        };
        f.write_str(name)
    }
}

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aws" => Ok(Provider::Aws),
            "gce" => Ok(Provider::Gce),
            "digitalocean" => Ok(Provider::DigitalOcean),
            "packet" => Ok(Provider::Packet),
            "openstack" => Ok(Provider::OpenStack),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Error returned when parsing an unrecognised provider name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown provider: {}", self.0)
    }
}

impl std::error::Error for UnknownProvider {}

/// Cloud-spec keys persisted on the cluster record.
///
/// The spellings are part of the storage format: clusters written by older
/// builds must stay readable, so these strings never change.
pub mod cloud_spec {
    pub const AWS_AVAILABILITY_ZONE: &str = "aws/availabilityZone";
    pub const AWS_VPC_CIDR: &str = "aws/vpcCidr";
    pub const AWS_VPC_ID: &str = "aws/vpcId";
    pub const AWS_KEY_PAIR_NAME: &str = "aws/keyPairName";
    pub const AWS_MASTERS_SEC_GROUP_ID: &str = "aws/mastersSecGroupId";
    pub const AWS_NODES_SEC_GROUP_ID: &str = "aws/nodesSecGroupId";
    pub const AWS_SSH_BOOTSTRAP_PRIVATE_KEY: &str = "aws/sshBootstrapPrivateKey";
    pub const AWS_USER_PROVIDED_SSH_PUBLIC_KEY: &str = "aws/userProvidedSshPublicKey";
    pub const AWS_ROUTE_TABLE_ID: &str = "aws/routeTableId";
    pub const AWS_INTERNET_GATEWAY_ID: &str = "aws/internetGatewayId";
    pub const AWS_MASTERS_INSTANCE_PROFILE: &str = "aws/mastersInstanceProfile";
    pub const AWS_NODES_INSTANCE_PROFILE: &str = "aws/nodesInstanceProfile";
    pub const AWS_IMAGE_ID: &str = "aws/imageId";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_round_trip() {
        for p in [
            Provider::Aws,
            Provider::Gce,
            Provider::DigitalOcean,
            Provider::Packet,
            Provider::OpenStack,
        ] {
            let parsed: Provider = p.to_string().parse().unwrap();
            assert_eq!(parsed, p);
        }
    }

    #[test]
    fn test_provider_serde_strings() {
        assert_eq!(serde_json::to_string(&Provider::Aws).unwrap(), "\"aws\"");
        assert_eq!(
            serde_json::to_string(&Provider::DigitalOcean).unwrap(),
            "\"digitalocean\""
        );
        assert_eq!(
            serde_json::to_string(&Provider::OpenStack).unwrap(),
            "\"openstack\""
        );
    }

    #[test]
    fn test_unknown_provider() {
        let err = "vultr".parse::<Provider>().unwrap_err();
        assert_eq!(err.to_string(), "unknown provider: vultr");
    }

    #[test]
    fn test_cloud_spec_spellings() {
        // Persisted clusters may be read by upgraded versions; keys are frozen.
        assert_eq!(cloud_spec::AWS_AVAILABILITY_ZONE, "aws/availabilityZone");
        assert_eq!(cloud_spec::AWS_VPC_CIDR, "aws/vpcCidr");
        assert_eq!(cloud_spec::AWS_VPC_ID, "aws/vpcId");
        assert_eq!(cloud_spec::AWS_KEY_PAIR_NAME, "aws/keyPairName");
        assert_eq!(cloud_spec::AWS_MASTERS_SEC_GROUP_ID, "aws/mastersSecGroupId");
        assert_eq!(cloud_spec::AWS_NODES_SEC_GROUP_ID, "aws/nodesSecGroupId");
        assert_eq!(
            cloud_spec::AWS_SSH_BOOTSTRAP_PRIVATE_KEY,
            "aws/sshBootstrapPrivateKey"
        );
        assert_eq!(
            cloud_spec::AWS_USER_PROVIDED_SSH_PUBLIC_KEY,
            "aws/userProvidedSshPublicKey"
        );
        assert_eq!(cloud_spec::AWS_ROUTE_TABLE_ID, "aws/routeTableId");
        assert_eq!(cloud_spec::AWS_INTERNET_GATEWAY_ID, "aws/internetGatewayId");
        assert_eq!(
            cloud_spec::AWS_MASTERS_INSTANCE_PROFILE,
            "aws/mastersInstanceProfile"
        );
        assert_eq!(
            cloud_spec::AWS_NODES_INSTANCE_PROFILE,
            "aws/nodesInstanceProfile"
        );
        assert_eq!(cloud_spec::AWS_IMAGE_ID, "aws/imageId");
    }
}
