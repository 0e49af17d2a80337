//! IPv4 CIDR handling and the VPC declarations.

use crate::config::NetworkConfig;
use crate::error::{RelayError, Result};
use crate::template::{availability_zone, get_att, ref_to, Resource, Template};
use serde_json::{json, Value};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// AWS rejects subnets smaller than /28.
pub const MAX_SUBNET_PREFIX: u8 = 28;

/// Zones available in most regions. `Fn::GetAZs` selection past the region's
/// count fails at deploy time.
pub const COMMON_REGION_AZS: usize = 3;

// ---------------------------------------------------------------------------
// Cidr
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cidr {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Cidr {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        let cidr = Self { addr, prefix };
        if prefix > 32 || u32::from(addr) & !cidr.mask() != 0 {
            return Err(RelayError::InvalidCidr(format!("{addr}/{prefix}")));
        }
        Ok(cidr)
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    pub fn contains(&self, other: &Cidr) -> bool {
        other.prefix >= self.prefix && u32::from(other.addr) & self.mask() == u32::from(self.addr)
    }

    /// Split into consecutive `/prefix` blocks in address order.
    pub fn subnets(&self, prefix: u8) -> Result<impl Iterator<Item = Cidr>> {
        if prefix < self.prefix || prefix > 32 {
            return Err(RelayError::SubnetOverflow {
                cidr: self.to_string(),
                prefix,
                count: 1,
            });
        }
        let base = u32::from(self.addr);
        let step = 1u64 << (32 - u32::from(prefix));
        let count = 1u64 << u32::from(prefix - self.prefix);
        Ok((0..count).map(move |i| Cidr {
            addr: Ipv4Addr::from((u64::from(base) + i * step) as u32),
            prefix,
        }))
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for Cidr {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || RelayError::InvalidCidr(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        Cidr::new(addr, prefix).map_err(|_| invalid())
    }
}

/// One public and one private subnet per zone. `None` on overflow.
pub fn subnet_count(azs: usize) -> Option<usize> {
    azs.checked_mul(2)
}

/// Take the first `count` `/prefix` subnets of `vpc`.
pub fn carve_subnets(vpc: &Cidr, prefix: u8, count: usize) -> Result<Vec<Cidr>> {
    let overflow = || RelayError::SubnetOverflow {
        cidr: vpc.to_string(),
        prefix,
        count,
    };
    if count == 0 || prefix > MAX_SUBNET_PREFIX {
        return Err(overflow());
    }
    let subnets: Vec<Cidr> = vpc.subnets(prefix).map_err(|_| overflow())?.take(count).collect();
    if subnets.len() < count {
        return Err(overflow());
    }
    Ok(subnets)
}

// ---------------------------------------------------------------------------
// VPC declarations
// ---------------------------------------------------------------------------

pub const VPC_ID: &str = "Vpc";
const IGW_ID: &str = "VpcIgw";
const IGW_ATTACHMENT_ID: &str = "VpcGatewayAttachment";

/// Values other declarations use to attach to the network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRefs {
    pub vpc_id: Value,
    pub public_subnets: Vec<Value>,
    pub private_subnets: Vec<Value>,
    /// Public default routes an internet-facing load balancer must wait for.
    pub internet_routes: Vec<String>,
}

/// Declare a new VPC, or hand back the ids of an imported one.
pub fn declare_network(
    template: &mut Template,
    stack_name: &str,
    network: &NetworkConfig,
    public_load_balancer: bool,
) -> Result<NetworkRefs> {
    if let Some(existing) = &network.existing {
        if existing.private_subnet_ids.is_empty()
            || (public_load_balancer && existing.public_subnet_ids.is_empty())
        {
            return Err(RelayError::MissingSubnets(existing.vpc_id.clone()));
        }
        tracing::debug!(vpc_id = %existing.vpc_id, "importing existing VPC");
        return Ok(NetworkRefs {
            vpc_id: json!(existing.vpc_id),
            public_subnets: existing.public_subnet_ids.iter().map(|s| json!(s)).collect(),
            private_subnets: existing.private_subnet_ids.iter().map(|s| json!(s)).collect(),
            internet_routes: Vec::new(),
        });
    }

    let vpc: Cidr = network.vpc_cidr.parse()?;
    let azs = network.max_azs;
    let count = subnet_count(azs).ok_or_else(|| RelayError::SubnetOverflow {
        cidr: vpc.to_string(),
        prefix: network.subnet_prefix,
        count: azs.saturating_mul(2),
    })?;
    let subnets = carve_subnets(&vpc, network.subnet_prefix, count)?;
    let (public_cidrs, private_cidrs) = subnets.split_at(azs);
    let nat_count = network.nat_gateways.clamp(1, azs);

    template.add(
        VPC_ID,
        Resource::new(
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": vpc.to_string(),
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default",
                "Tags": name_tag(&format!("{stack_name}/VPC")),
            }),
        ),
    )?;
    template.add(
        IGW_ID,
        Resource::new(
            "AWS::EC2::InternetGateway",
            json!({ "Tags": name_tag(&format!("{stack_name}/VPC")) }),
        ),
    )?;
    template.add(
        IGW_ATTACHMENT_ID,
        Resource::new(
            "AWS::EC2::VPCGatewayAttachment",
            json!({ "VpcId": ref_to(VPC_ID), "InternetGatewayId": ref_to(IGW_ID) }),
        ),
    )?;

    let mut refs = NetworkRefs {
        vpc_id: ref_to(VPC_ID),
        public_subnets: Vec::with_capacity(azs),
        private_subnets: Vec::with_capacity(azs),
        internet_routes: Vec::with_capacity(azs),
    };

    for (i, cidr) in public_cidrs.iter().enumerate() {
        let id = format!("VpcPublicSubnet{}", i + 1);
        declare_subnet(template, stack_name, &id, "Public", i, cidr, true)?;
        template.add(
            &format!("{id}DefaultRoute"),
            Resource::new(
                "AWS::EC2::Route",
                json!({
                    "RouteTableId": ref_to(&format!("{id}RouteTable")),
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "GatewayId": ref_to(IGW_ID),
                }),
            )
            .depends_on(IGW_ATTACHMENT_ID),
        )?;
        if i < nat_count {
            template.add(
                &format!("{id}Eip"),
                Resource::new(
                    "AWS::EC2::EIP",
                    json!({ "Domain": "vpc", "Tags": name_tag(&format!("{stack_name}/VPC/{id}")) }),
                ),
            )?;
            template.add(
                &format!("{id}NatGateway"),
                Resource::new(
                    "AWS::EC2::NatGateway",
                    json!({
                        "SubnetId": ref_to(&id),
                        "AllocationId": get_att(&format!("{id}Eip"), "AllocationId"),
                        "Tags": name_tag(&format!("{stack_name}/VPC/{id}")),
                    }),
                )
                .depends_on(&format!("{id}DefaultRoute"))
                .depends_on(&format!("{id}RouteTableAssociation")),
            )?;
        }
        refs.public_subnets.push(ref_to(&id));
        refs.internet_routes.push(format!("{id}DefaultRoute"));
    }

    for (i, cidr) in private_cidrs.iter().enumerate() {
        let id = format!("VpcPrivateSubnet{}", i + 1);
        declare_subnet(template, stack_name, &id, "Private", i, cidr, false)?;
        let nat = format!("VpcPublicSubnet{}NatGateway", i % nat_count + 1);
        template.add(
            &format!("{id}DefaultRoute"),
            Resource::new(
                "AWS::EC2::Route",
                json!({
                    "RouteTableId": ref_to(&format!("{id}RouteTable")),
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "NatGatewayId": ref_to(&nat),
                }),
            ),
        )?;
        refs.private_subnets.push(ref_to(&id));
    }

    tracing::debug!(%vpc, azs, nat_count, "declared VPC");
    Ok(refs)
}

fn declare_subnet(
    template: &mut Template,
    stack_name: &str,
    id: &str,
    kind: &str,
    az_index: usize,
    cidr: &Cidr,
    public: bool,
) -> Result<()> {
    template.add(
        id,
        Resource::new(
            "AWS::EC2::Subnet",
            json!({
                "VpcId": ref_to(VPC_ID),
                "AvailabilityZone": availability_zone(az_index),
                "CidrBlock": cidr.to_string(),
                "MapPublicIpOnLaunch": public,
                "Tags": [
                    { "Key": "Name", "Value": format!("{stack_name}/VPC/{id}") },
                    { "Key": "ses-relay:subnet-type", "Value": kind },
                ],
            }),
        ),
    )?;
    template.add(
        &format!("{id}RouteTable"),
        Resource::new(
            "AWS::EC2::RouteTable",
            json!({ "VpcId": ref_to(VPC_ID), "Tags": name_tag(&format!("{stack_name}/VPC/{id}")) }),
        ),
    )?;
    template.add(
        &format!("{id}RouteTableAssociation"),
        Resource::new(
            "AWS::EC2::SubnetRouteTableAssociation",
            json!({
                "RouteTableId": ref_to(&format!("{id}RouteTable")),
                "SubnetId": ref_to(id),
            }),
        ),
    )
}

fn name_tag(name: &str) -> Value {
    json!([{ "Key": "Name", "Value": name }])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExistingVpc;

    #[test]
    fn parse_and_display() {
        let c: Cidr = "10.21.0.0/16".parse().unwrap();
        assert_eq!(c.prefix(), 16);
        assert_eq!(c.addr(), Ipv4Addr::new(10, 21, 0, 0));
        assert_eq!(c.to_string(), "10.21.0.0/16");
        assert_eq!("0.0.0.0/0".parse::<Cidr>().unwrap().prefix(), 0);
    }

    #[test]
    fn parse_rejects_malformed() {
        for s in ["10.21.0.0", "10.21.0.0/33", "10.21.0.1/16", "10.21.0/16", "x/8", ""] {
            assert!(s.parse::<Cidr>().is_err(), "expected invalid: {s}");
        }
    }

    #[test]
    fn contains() {
        let vpc: Cidr = "10.21.0.0/16".parse().unwrap();
        assert!(vpc.contains(&"10.21.7.0/24".parse().unwrap()));
        assert!(vpc.contains(&vpc));
        assert!(!vpc.contains(&"10.22.0.0/24".parse().unwrap()));
        assert!(!vpc.contains(&"10.0.0.0/8".parse().unwrap()));
        assert!("0.0.0.0/0".parse::<Cidr>().unwrap().contains(&vpc));
    }

    #[test]
    fn carve_in_address_order() {
        let vpc: Cidr = "10.21.0.0/16".parse().unwrap();
        let subnets = carve_subnets(&vpc, 24, 3).unwrap();
        let s: Vec<String> = subnets.iter().map(|c| c.to_string()).collect();
        assert_eq!(s, ["10.21.0.0/24", "10.21.1.0/24", "10.21.2.0/24"]);
        assert!(subnets.iter().all(|c| vpc.contains(c)));
    }

    #[test]
    fn carve_overflow() {
        let vpc: Cidr = "10.0.0.0/23".parse().unwrap();
        assert!(carve_subnets(&vpc, 24, 2).is_ok());
        assert!(matches!(
            carve_subnets(&vpc, 24, 3),
            Err(RelayError::SubnetOverflow { count: 3, .. })
        ));
        assert!(carve_subnets(&vpc, 22, 1).is_err());
        assert!(carve_subnets(&vpc, 29, 1).is_err());
    }

    #[test]
    fn new_vpc_has_public_and_private_subnets_per_az() {
        let mut t = Template::new("test");
        let refs = declare_network(&mut t, "SESRELAY", &NetworkConfig::default(), false).unwrap();
        assert_eq!(refs.vpc_id, ref_to("Vpc"));
        assert_eq!(refs.public_subnets.len(), 3);
        assert_eq!(refs.private_subnets.len(), 3);
        assert_eq!(t.resources_of_type("AWS::EC2::Subnet").count(), 6);
        assert_eq!(t.resources_of_type("AWS::EC2::NatGateway").count(), 1);
        assert_eq!(
            t.get("VpcPrivateSubnet3").unwrap().property("CidrBlock"),
            Some(&json!("10.21.5.0/24"))
        );
        // Every private subnet routes through the single NAT gateway.
        for i in 1..=3 {
            let route = t.get(&format!("VpcPrivateSubnet{i}DefaultRoute")).unwrap();
            assert_eq!(
                route.property("NatGatewayId"),
                Some(&ref_to("VpcPublicSubnet1NatGateway"))
            );
        }
        t.check_references().unwrap();
        t.deployment_order().unwrap();
    }

    #[test]
    fn nat_gateways_spread_round_robin() {
        let mut t = Template::new("test");
        let network = NetworkConfig {
            nat_gateways: 2,
            ..NetworkConfig::default()
        };
        declare_network(&mut t, "SESRELAY", &network, false).unwrap();
        assert_eq!(t.resources_of_type("AWS::EC2::NatGateway").count(), 2);
        let route = t.get("VpcPrivateSubnet3DefaultRoute").unwrap();
        assert_eq!(
            route.property("NatGatewayId"),
            Some(&ref_to("VpcPublicSubnet1NatGateway"))
        );
    }

    #[test]
    fn oversized_zone_count_is_an_error() {
        assert_eq!(subnet_count(3), Some(6));
        assert_eq!(subnet_count(usize::MAX), None);
        for max_azs in [usize::MAX, usize::MAX / 2 + 1, 200] {
            let mut t = Template::new("test");
            let network = NetworkConfig {
                max_azs,
                ..NetworkConfig::default()
            };
            assert!(matches!(
                declare_network(&mut t, "SESRELAY", &network, false),
                Err(RelayError::SubnetOverflow { .. })
            ));
            assert!(t.resources.is_empty());
        }
    }

    #[test]
    fn imported_vpc_declares_nothing() {
        let mut t = Template::new("test");
        let network = NetworkConfig {
            existing: Some(ExistingVpc {
                vpc_id: "vpc-0abc".to_string(),
                public_subnet_ids: vec![],
                private_subnet_ids: vec!["subnet-1".to_string(), "subnet-2".to_string()],
            }),
            ..NetworkConfig::default()
        };
        let refs = declare_network(&mut t, "SESRELAY", &network, false).unwrap();
        assert!(t.resources.is_empty());
        assert_eq!(refs.vpc_id, json!("vpc-0abc"));
        assert_eq!(refs.private_subnets, [json!("subnet-1"), json!("subnet-2")]);

        // An internet-facing load balancer needs public subnets.
        let mut t = Template::new("test");
        assert!(matches!(
            declare_network(&mut t, "SESRELAY", &network, true),
            Err(RelayError::MissingSubnets(_))
        ));
    }
}
