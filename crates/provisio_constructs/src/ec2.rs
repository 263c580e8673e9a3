//! Networks, security groups and instances.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use provisio_config::Ipv4Cidr;
use provisio_core::{CoreError, CoreResult, ResourceRef, StackScope, Token};

use crate::iam::RoleRef;

/// Routing class of a subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetType {
    /// Routes to an internet gateway.
    Public,
    /// Routes outbound traffic through a NAT gateway.
    Private,
    /// No route outside the network.
    Isolated,
}

impl SubnetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubnetType::Public => "Public",
            SubnetType::Private => "Private",
            SubnetType::Isolated => "Isolated",
        }
    }
}

/// One subnet group, replicated in every availability zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetConfiguration {
    pub name: String,
    pub subnet_type: SubnetType,
    pub cidr_mask: u8,
}

impl SubnetConfiguration {
    pub fn new(name: impl Into<String>, subnet_type: SubnetType, cidr_mask: u8) -> Self {
        Self {
            name: name.into(),
            subnet_type,
            cidr_mask,
        }
    }
}

/// A declared subnet.
#[derive(Debug, Clone, PartialEq)]
pub struct SubnetRef {
    pub group: String,
    pub subnet_type: SubnetType,
    pub az_index: usize,
    pub cidr: Ipv4Cidr,
    pub id: Token,
}

/// A virtual network with subnets spread over availability zones.
#[derive(Debug, Clone)]
pub struct Vpc {
    construct_id: String,
    cidr: Ipv4Cidr,
    max_azs: usize,
    nat_gateways: usize,
    subnets: Vec<SubnetConfiguration>,
}

impl Vpc {
    pub fn new(construct_id: impl Into<String>, cidr: Ipv4Cidr) -> Self {
        Self {
            construct_id: construct_id.into(),
            cidr,
            max_azs: 2,
            nat_gateways: 1,
            subnets: Vec::new(),
        }
    }

    pub fn with_max_azs(mut self, max_azs: usize) -> Self {
        self.max_azs = max_azs;
        self
    }

    pub fn with_nat_gateways(mut self, count: usize) -> Self {
        self.nat_gateways = count;
        self
    }

    pub fn with_subnet(mut self, subnet: SubnetConfiguration) -> Self {
        self.subnets.push(subnet);
        self
    }

    /// Carve subnet blocks in declaration order: every group, then every
    /// zone within the group.
    fn allocate(&self) -> CoreResult<Vec<(usize, usize, Ipv4Cidr)>> {
        let mut allocated = Vec::new();
        let mut cursor: u64 = 0;
        let needed = self.subnets.len() * self.max_azs;

        for (group, config) in self.subnets.iter().enumerate() {
            let exhausted = || CoreError::SubnetExhausted {
                cidr: self.cidr.to_string(),
                mask: config.cidr_mask,
                count: needed,
            };
            if config.cidr_mask < self.cidr.prefix() || config.cidr_mask > 32 {
                return Err(exhausted());
            }
            let block_size = 1u64 << (32 - u32::from(config.cidr_mask));
            // Align to the block size of this group.
            cursor = cursor.div_ceil(block_size) * block_size;

            for az in 0..self.max_azs {
                let index = cursor / block_size;
                let block = self
                    .cidr
                    .subnets(config.cidr_mask)
                    .nth(index as usize)
                    .ok_or_else(exhausted)?;
                allocated.push((group, az, block));
                cursor += block_size;
            }
        }
        Ok(allocated)
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<VpcRef> {
        let allocation = self.allocate()?;
        let id = &self.construct_id;

        let vpc = scope.add_resource(
            id,
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": self.cidr.to_string(),
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default",
            }),
        )?;
        let vpc_id = scope.resolve(&vpc.ref_token());

        let has_public = self
            .subnets
            .iter()
            .any(|s| s.subnet_type == SubnetType::Public);
        let igw = if has_public {
            let igw = scope.add_resource(&format!("{id}-igw"), "AWS::EC2::InternetGateway", json!({}))?;
            let igw_ref = scope.resolve(&igw.ref_token());
            scope.add_resource(
                &format!("{id}-vpc-gw"),
                "AWS::EC2::VPCGatewayAttachment",
                json!({ "VpcId": vpc_id, "InternetGatewayId": igw_ref }),
            )?;
            Some(igw)
        } else {
            None
        };

        let mut subnets = Vec::with_capacity(allocation.len());
        let mut nat_gateways: Vec<ResourceRef> = Vec::new();

        for (group, az, block) in allocation {
            let config = &self.subnets[group];
            let subnet_id = format!("{id}-{}-subnet{}", config.name, az + 1);
            let name_tag = format!("{}/{}", scope.id(), subnet_id);
            let subnet = scope.add_resource(
                &subnet_id,
                "AWS::EC2::Subnet",
                json!({
                    "VpcId": vpc_id,
                    "CidrBlock": block.to_string(),
                    "AvailabilityZone": { "Fn::Select": [az, { "Fn::GetAZs": "" }] },
                    "MapPublicIpOnLaunch": config.subnet_type == SubnetType::Public,
                    "Tags": [
                        { "Key": "Name", "Value": name_tag },
                        { "Key": "subnet-name", "Value": config.name },
                        { "Key": "subnet-type", "Value": config.subnet_type.as_str() },
                    ],
                }),
            )?;
            let subnet_ref = scope.resolve(&subnet.ref_token());

            let table = scope.add_resource(
                &format!("{subnet_id}-route-table"),
                "AWS::EC2::RouteTable",
                json!({ "VpcId": vpc_id }),
            )?;
            let table_ref = scope.resolve(&table.ref_token());
            scope.add_resource(
                &format!("{subnet_id}-route-table-association"),
                "AWS::EC2::SubnetRouteTableAssociation",
                json!({ "RouteTableId": table_ref, "SubnetId": subnet_ref }),
            )?;

            match config.subnet_type {
                SubnetType::Public => {
                    if let Some(igw) = &igw {
                        let gateway = scope.resolve(&igw.ref_token());
                        scope.add_resource(
                            &format!("{subnet_id}-default-route"),
                            "AWS::EC2::Route",
                            json!({
                                "RouteTableId": table_ref,
                                "DestinationCidrBlock": "0.0.0.0/0",
                                "GatewayId": gateway,
                            }),
                        )?;
                    }
                    if nat_gateways.len() < self.nat_gateways {
                        let eip = scope.add_resource(
                            &format!("{subnet_id}-eip"),
                            "AWS::EC2::EIP",
                            json!({ "Domain": "vpc" }),
                        )?;
                        let allocation_id = scope.resolve(&eip.attr("AllocationId"));
                        let nat = scope.add_resource(
                            &format!("{subnet_id}-nat-gateway"),
                            "AWS::EC2::NatGateway",
                            json!({ "AllocationId": allocation_id, "SubnetId": subnet_ref }),
                        )?;
                        nat_gateways.push(nat);
                    }
                }
                SubnetType::Private => {
                    if nat_gateways.is_empty() {
                        return Err(CoreError::InvalidReference(format!(
                            "private subnet {subnet_id} needs a NAT gateway in a public subnet"
                        )));
                    }
                    let nat = &nat_gateways[az % nat_gateways.len()];
                    let nat_ref = scope.resolve(&nat.ref_token());
                    scope.add_resource(
                        &format!("{subnet_id}-default-route"),
                        "AWS::EC2::Route",
                        json!({
                            "RouteTableId": table_ref,
                            "DestinationCidrBlock": "0.0.0.0/0",
                            "NatGatewayId": nat_ref,
                        }),
                    )?;
                }
                SubnetType::Isolated => {}
            }

            debug!("Subnet {} ({}) gets {}", subnet_id, config.subnet_type.as_str(), block);
            subnets.push(SubnetRef {
                group: config.name.clone(),
                subnet_type: config.subnet_type,
                az_index: az,
                cidr: block,
                id: subnet.ref_token(),
            });
        }

        Ok(VpcRef {
            id: vpc.ref_token(),
            cidr: self.cidr,
            subnets,
            resource: vpc,
        })
    }
}

/// Handle to a declared network.
#[derive(Debug, Clone, PartialEq)]
pub struct VpcRef {
    pub resource: ResourceRef,
    pub id: Token,
    pub cidr: Ipv4Cidr,
    pub subnets: Vec<SubnetRef>,
}

impl VpcRef {
    pub fn subnets_of_type(&self, subnet_type: SubnetType) -> Vec<&SubnetRef> {
        self.subnets
            .iter()
            .filter(|s| s.subnet_type == subnet_type)
            .collect()
    }

    /// Subnet ids of a routing class, in zone order.
    pub fn subnet_ids(&self, subnet_type: SubnetType) -> Vec<Token> {
        self.subnets_of_type(subnet_type)
            .into_iter()
            .map(|s| s.id.clone())
            .collect()
    }

    /// Subnet ids of a named group, in zone order.
    pub fn subnet_ids_in_group(&self, group: &str) -> Vec<Token> {
        self.subnets
            .iter()
            .filter(|s| s.group == group)
            .map(|s| s.id.clone())
            .collect()
    }
}

/// Source of inbound traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Peer {
    Ipv4(String),
    SecurityGroup(Token),
}

impl Peer {
    pub fn ipv4(cidr: impl Into<String>) -> Self {
        Peer::Ipv4(cidr.into())
    }
}

/// Port range of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    Tcp(u16),
    TcpRange(u16, u16),
    AllTcp,
}

impl Port {
    fn range(&self) -> (u16, u16) {
        match *self {
            Port::Tcp(port) => (port, port),
            Port::TcpRange(from, to) => (from, to),
            Port::AllTcp => (0, 65535),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Port::Tcp(port) => format!("tcp {port}"),
            Port::TcpRange(from, to) => format!("tcp {from}-{to}"),
            Port::AllTcp => "all tcp".to_string(),
        }
    }
}

/// A security group to declare.
#[derive(Debug, Clone)]
pub struct SecurityGroup {
    construct_id: String,
    vpc_id: Token,
    description: String,
    allow_all_outbound: bool,
}

impl SecurityGroup {
    pub fn new(construct_id: impl Into<String>, vpc: &VpcRef) -> Self {
        let construct_id = construct_id.into();
        Self {
            description: construct_id.clone(),
            construct_id,
            vpc_id: vpc.id.clone(),
            allow_all_outbound: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn allow_all_outbound(mut self, allow: bool) -> Self {
        self.allow_all_outbound = allow;
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<SecurityGroupRef> {
        let vpc_id = scope.resolve(&self.vpc_id);
        let egress = if self.allow_all_outbound {
            json!([{
                "CidrIp": "0.0.0.0/0",
                "Description": "Allow all outbound traffic by default",
                "IpProtocol": "-1",
            }])
        } else {
            // A rule that matches nothing replaces the implicit allow-all.
            json!([{
                "CidrIp": "255.255.255.255/32",
                "Description": "Disallow all traffic",
                "FromPort": 252,
                "IpProtocol": "icmp",
                "ToPort": 86,
            }])
        };
        let resource = scope.add_resource(
            &self.construct_id,
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": self.description,
                "SecurityGroupEgress": egress,
                "VpcId": vpc_id,
            }),
        )?;
        Ok(SecurityGroupRef::new(resource.attr("GroupId")))
    }
}

/// Handle to a security group.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityGroupRef {
    pub id: Token,
}

impl SecurityGroupRef {
    pub fn new(id: Token) -> Self {
        Self { id }
    }

    /// Peer matching traffic from members of this group.
    pub fn peer(&self) -> Peer {
        Peer::SecurityGroup(self.id.clone())
    }

    /// Allow inbound traffic. The rule is declared in the scope's stack.
    pub fn add_ingress_rule(
        &self,
        scope: &mut StackScope<'_>,
        construct_id: &str,
        peer: &Peer,
        port: Port,
        description: &str,
    ) -> CoreResult<ResourceRef> {
        let (from, to) = port.range();
        let group_id = scope.resolve(&self.id);
        let mut properties = json!({
            "GroupId": group_id,
            "IpProtocol": "tcp",
            "FromPort": from,
            "ToPort": to,
            "Description": description,
        });
        match peer {
            Peer::Ipv4(cidr) => properties["CidrIp"] = json!(cidr),
            Peer::SecurityGroup(source) => {
                properties["SourceSecurityGroupId"] = scope.resolve(source);
            }
        }
        scope.add_resource(construct_id, "AWS::EC2::SecurityGroupIngress", properties)
    }
}

/// Machine image of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineImage {
    /// Latest Amazon Linux 2, looked up at deploy time.
    AmazonLinux2,
    Ami(String),
}

impl MachineImage {
    const AMAZON_LINUX_2_PARAMETER: &'static str =
        "/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-x86_64-gp2";

    fn render(&self, scope: &mut StackScope<'_>) -> Value {
        match self {
            MachineImage::AmazonLinux2 => scope.add_parameter(
                "SsmParameterValueAmazonLinux2Ami",
                json!({
                    "Type": "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>",
                    "Default": Self::AMAZON_LINUX_2_PARAMETER,
                }),
            ),
            MachineImage::Ami(id) => json!(id),
        }
    }
}

/// A single EC2 instance.
#[derive(Debug, Clone)]
pub struct Instance {
    construct_id: String,
    instance_type: String,
    subnet: Option<Token>,
    name: Option<String>,
    image: MachineImage,
    security_group: Option<SecurityGroupRef>,
    role: Option<RoleRef>,
}

impl Instance {
    /// An instance in the first subnet of `subnet_type`.
    pub fn new(
        construct_id: impl Into<String>,
        vpc: &VpcRef,
        subnet_type: SubnetType,
        instance_type: impl Into<String>,
    ) -> Self {
        Self {
            construct_id: construct_id.into(),
            instance_type: instance_type.into(),
            subnet: vpc.subnet_ids(subnet_type).into_iter().next(),
            name: None,
            image: MachineImage::AmazonLinux2,
            security_group: None,
            role: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_image(mut self, image: MachineImage) -> Self {
        self.image = image;
        self
    }

    pub fn with_security_group(mut self, group: &SecurityGroupRef) -> Self {
        self.security_group = Some(group.clone());
        self
    }

    pub fn with_role(mut self, role: &RoleRef) -> Self {
        self.role = Some(role.clone());
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<ResourceRef> {
        let subnet = self.subnet.clone().ok_or_else(|| {
            CoreError::InvalidReference(format!(
                "instance {} has no subnet to run in",
                self.construct_id
            ))
        })?;

        let mut properties = json!({
            "InstanceType": self.instance_type,
            "ImageId": self.image.render(scope),
            "SubnetId": scope.resolve(&subnet),
        });
        if let Some(group) = &self.security_group {
            properties["SecurityGroupIds"] = json!([scope.resolve(&group.id)]);
        }
        if let Some(name) = &self.name {
            properties["Tags"] = json!([{ "Key": "Name", "Value": name }]);
        }

        let mut profile = None;
        if let Some(role) = &self.role {
            let role_name = scope.resolve(&role.name);
            let instance_profile = scope.add_resource(
                &format!("{}-instance-profile", self.construct_id),
                "AWS::IAM::InstanceProfile",
                json!({ "Roles": [role_name] }),
            )?;
            properties["IamInstanceProfile"] = scope.resolve(&instance_profile.ref_token());
            profile = Some(role.clone());
        }

        let instance = scope.add_resource(&self.construct_id, "AWS::EC2::Instance", properties)?;
        if let Some(RoleRef {
            resource: Some(role),
            ..
        }) = profile
        {
            scope.add_depends_on(&instance, &role)?;
        }
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::app;

    fn three_tier(mask: u8) -> Vpc {
        Vpc::new("vpc", "10.0.0.0/16".parse().unwrap())
            .with_subnet(SubnetConfiguration::new("Public", SubnetType::Public, mask))
            .with_subnet(SubnetConfiguration::new("Private", SubnetType::Private, mask))
            .with_subnet(SubnetConfiguration::new("DB", SubnetType::Isolated, mask))
    }

    #[test]
    fn test_subnet_allocation_is_sequential() {
        let blocks: Vec<String> = three_tier(24)
            .allocate()
            .unwrap()
            .into_iter()
            .map(|(_, _, c)| c.to_string())
            .collect();
        assert_eq!(
            blocks,
            vec![
                "10.0.0.0/24",
                "10.0.1.0/24",
                "10.0.2.0/24",
                "10.0.3.0/24",
                "10.0.4.0/24",
                "10.0.5.0/24",
            ]
        );
    }

    #[test]
    fn test_subnet_allocation_exhausted() {
        let vpc = Vpc::new("vpc", "10.0.0.0/24".parse().unwrap())
            .with_subnet(SubnetConfiguration::new("Public", SubnetType::Public, 25))
            .with_subnet(SubnetConfiguration::new("Private", SubnetType::Private, 25));
        let err = vpc.allocate().unwrap_err();
        assert!(matches!(err, CoreError::SubnetExhausted { mask: 25, count: 4, .. }));
    }

    #[test]
    fn test_vpc_routes() {
        let mut app = app();
        let vpc = app.stack("foundation", |scope| three_tier(24).add(scope)).unwrap();

        assert_eq!(vpc.subnets.len(), 6);
        assert_eq!(vpc.subnet_ids(SubnetType::Private).len(), 2);
        assert_eq!(vpc.subnet_ids_in_group("DB").len(), 2);

        let stack = &app.stacks()[0];
        assert_eq!(stack.resources_of_type("AWS::EC2::NatGateway").count(), 1);
        assert_eq!(stack.resources_of_type("AWS::EC2::Route").count(), 4);

        let private_route = stack.resource("VpcPrivateSubnet2DefaultRoute").unwrap();
        assert_eq!(
            private_route.property("NatGatewayId"),
            Some(&json!({ "Ref": "VpcPublicSubnet1NatGateway" }))
        );
    }

    #[test]
    fn test_ingress_rules() {
        let mut app = app();
        app.stack("foundation", |scope| {
            let vpc = three_tier(24).add(scope)?;
            let sg = SecurityGroup::new("elb-sg", &vpc)
                .with_description("SG for Elastic Load balancer")
                .add(scope)?;
            sg.add_ingress_rule(
                scope,
                "elb-sg-from-vpc",
                &Peer::ipv4("10.0.0.0/16"),
                Port::AllTcp,
                "allow all internal traffic",
            )?;
            sg.add_ingress_rule(scope, "elb-sg-443", &Peer::ipv4("1.2.3.4/32"), Port::Tcp(443), "443")
        })
        .unwrap();

        let stack = &app.stacks()[0];
        let internal = stack.resource("ElbSgFromVpc").unwrap();
        assert_eq!(internal.property("ToPort"), Some(&json!(65535)));
        assert_eq!(
            internal.property("GroupId"),
            Some(&json!({ "Fn::GetAtt": ["ElbSg", "GroupId"] }))
        );
        let https = stack.resource("ElbSg443").unwrap();
        assert_eq!(https.property("FromPort"), Some(&json!(443)));
        assert_eq!(https.property("CidrIp"), Some(&json!("1.2.3.4/32")));
    }
}
