//! The DIMO developer-license protocol as a [`DeploymentPlan`].
//!
//! Networks differ only in the `external` addresses (`Receiver`, `DimoToken`,
//! `Admin`), the operator and the `params` table.

use crate::plan::{CallSpec, DeploymentPlan, InitArg, ParamType, RoleGrant, Stage};

pub const TWAP_V3: &str = "TwapV3";
pub const NORMALIZED_PRICE_PROVIDER: &str = "NormalizedPriceProvider";
pub const DIMO_CREDIT: &str = "DimoCredit";
pub const LICENSE_ACCOUNT_TEMPLATE: &str = "DimoDeveloperLicenseAccount";
pub const UPGRADEABLE_BEACON: &str = "UpgradeableBeacon";
pub const LICENSE_ACCOUNT_FACTORY: &str = "LicenseAccountFactory";
pub const DEV_LICENSE_DIMO: &str = "DevLicenseDimo";

/// External addresses every network has to configure.
pub const RECEIVER: &str = "Receiver";
pub const DIMO_TOKEN: &str = "DimoToken";
pub const ADMIN: &str = "Admin";

/// Keys of the `params` table.
pub const PARAM_LICENSE_COST_USD: &str = "license_cost_usd";
pub const PARAM_METADATA_IMAGE: &str = "metadata_image";
pub const PARAM_METADATA_DESCRIPTION: &str = "metadata_description";

// Role names. Identifiers are keccak256 of the name.
pub const PROVIDER_ADMIN_ROLE: &str = "PROVIDER_ADMIN_ROLE";
pub const DC_ADMIN_ROLE: &str = "DC_ADMIN_ROLE";
pub const BURNER_ROLE: &str = "BURNER_ROLE";
pub const UPGRADER_ROLE: &str = "UPGRADER_ROLE";
pub const LICENSE_ADMIN_ROLE: &str = "LICENSE_ADMIN_ROLE";
pub const REVOKER_ROLE: &str = "REVOKER_ROLE";

/// Stages in dependency order followed by the grant table.
pub fn plan() -> DeploymentPlan {
    use InitArg::Component;

    let stages = vec![
        Stage::bare(TWAP_V3, vec![]),
        Stage::bare(NORMALIZED_PRICE_PROVIDER, vec![]).wire(
            NORMALIZED_PRICE_PROVIDER,
            CallSpec::new(
                "addOracleSource(address)",
                vec![Component(TWAP_V3.into())],
            ),
        ),
        Stage::proxy(
            DIMO_CREDIT,
            Some(CallSpec::new(
                "initialize(address,address)",
                vec![
                    Component(RECEIVER.into()),
                    Component(NORMALIZED_PRICE_PROVIDER.into()),
                ],
            )),
        ),
        Stage::bare(LICENSE_ACCOUNT_TEMPLATE, vec![]),
        Stage::bare(
            UPGRADEABLE_BEACON,
            vec![
                Component(LICENSE_ACCOUNT_TEMPLATE.into()),
                Component(ADMIN.into()),
            ],
        ),
        Stage::proxy(
            LICENSE_ACCOUNT_FACTORY,
            Some(CallSpec::new(
                "initialize(address)",
                vec![Component(UPGRADEABLE_BEACON.into())],
            )),
        ),
        Stage::proxy(
            DEV_LICENSE_DIMO,
            Some(CallSpec::new(
                "initialize(address,address,address,address,address,uint256,string,string)",
                vec![
                    Component(RECEIVER.into()),
                    Component(LICENSE_ACCOUNT_FACTORY.into()),
                    Component(NORMALIZED_PRICE_PROVIDER.into()),
                    Component(DIMO_TOKEN.into()),
                    Component(DIMO_CREDIT.into()),
                    InitArg::param(PARAM_LICENSE_COST_USD, ParamType::Uint),
                    InitArg::param(PARAM_METADATA_IMAGE, ParamType::String),
                    InitArg::param(PARAM_METADATA_DESCRIPTION, ParamType::String),
                ],
            )),
        )
        .wire(
            LICENSE_ACCOUNT_FACTORY,
            CallSpec::new(
                "setLicense(address)",
                vec![Component(DEV_LICENSE_DIMO.into())],
            ),
        ),
    ];

    let grants = vec![
        // Needed before addOracleSource can be wired.
        RoleGrant::to_operator(NORMALIZED_PRICE_PROVIDER, PROVIDER_ADMIN_ROLE),
        RoleGrant::to_operator(DIMO_CREDIT, DC_ADMIN_ROLE),
        RoleGrant::to_operator(DIMO_CREDIT, UPGRADER_ROLE),
        RoleGrant::to_component(DIMO_CREDIT, BURNER_ROLE, DEV_LICENSE_DIMO),
        RoleGrant::to_operator(DEV_LICENSE_DIMO, LICENSE_ADMIN_ROLE),
        RoleGrant::to_operator(DEV_LICENSE_DIMO, REVOKER_ROLE),
        RoleGrant::to_operator(DEV_LICENSE_DIMO, UPGRADER_ROLE),
    ];

    DeploymentPlan::new(stages, grants)
}
