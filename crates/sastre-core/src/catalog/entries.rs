// The catalog table. One entry per item kind known to the engine.
//
// Endpoints and identity fields follow the vManage REST API. Kinds present
// only on newer controllers carry a `min_version`; the engine filters them
// against the target's reported version at session start.

use super::{CatalogEntry, Tag};

const NO_FIELDS: &[&str] = &[];

// Volatile fields the controller rewrites on every touch. Excluded from
// body comparison so `update` only pushes real differences.
const POLICY_SKIP_CMP: &[&str] = &[
    "lastUpdated",
    "referenceCount",
    "references",
    "activatedId",
    "isActivatedByVsmart",
    "owner",
    "infoTag",
];

const DEVICE_TEMPLATE_SKIP_CMP: &[&str] = &[
    "createdOn",
    "createdBy",
    "lastUpdatedBy",
    "lastUpdatedOn",
    "@rid",
    "owner",
    "infoTag",
    "templateAttached",
    "templateConfigurationEdited",
];

const FEATURE_TEMPLATE_SKIP_CMP: &[&str] = &[
    "createdOn",
    "createdBy",
    "lastUpdatedBy",
    "lastUpdatedOn",
    "@rid",
    "owner",
    "infoTag",
    "devicesAttached",
    "attachedMastersCount",
];

const VSMART_POLICY_SKIP_CMP: &[&str] = &["isPolicyActivated"];

const fn policy_list(
    kind: &'static str,
    info: &'static str,
    path: &'static str,
    store_dir: &'static str,
    min_version: Option<&'static str>,
) -> CatalogEntry {
    CatalogEntry {
        tag: Tag::PolicyList,
        kind,
        info,
        index_path: path,
        get_path: path,
        post_path: path,
        mutate_path: path,
        id_field: "listId",
        name_field: "name",
        store_dir,
        min_version,
        skip_cmp_fields: POLICY_SKIP_CMP,
        post_filtered_fields: NO_FIELDS,
    }
}

const fn policy_definition(
    kind: &'static str,
    info: &'static str,
    path: &'static str,
    store_dir: &'static str,
    min_version: Option<&'static str>,
) -> CatalogEntry {
    CatalogEntry {
        tag: Tag::PolicyDefinition,
        kind,
        info,
        index_path: path,
        get_path: path,
        post_path: path,
        mutate_path: path,
        id_field: "definitionId",
        name_field: "name",
        store_dir,
        min_version,
        skip_cmp_fields: POLICY_SKIP_CMP,
        post_filtered_fields: NO_FIELDS,
    }
}

const fn policy_template(
    tag: Tag,
    kind: &'static str,
    info: &'static str,
    index_path: &'static str,
    get_path: &'static str,
    store_dir: &'static str,
    min_version: Option<&'static str>,
    skip_cmp_fields: &'static [&'static str],
) -> CatalogEntry {
    CatalogEntry {
        tag,
        kind,
        info,
        index_path,
        get_path,
        post_path: index_path,
        mutate_path: index_path,
        id_field: "policyId",
        name_field: "policyName",
        store_dir,
        min_version,
        skip_cmp_fields,
        post_filtered_fields: NO_FIELDS,
    }
}

pub static CATALOG: &[CatalogEntry] = &[
    // ── Configuration groups and feature profiles (20.8+) ───────────
    CatalogEntry {
        tag: Tag::ConfigGroup,
        kind: "config_group",
        info: "configuration group",
        index_path: "v1/config-group",
        get_path: "v1/config-group",
        post_path: "v1/config-group",
        mutate_path: "v1/config-group",
        id_field: "id",
        name_field: "name",
        store_dir: "config_groups",
        min_version: Some("20.8"),
        skip_cmp_fields: &["createdOn", "createdBy", "lastUpdatedBy", "lastUpdatedOn"],
        post_filtered_fields: NO_FIELDS,
    },
    CatalogEntry {
        tag: Tag::FeatureProfile,
        kind: "feature_profile.sdwan",
        info: "SD-WAN feature profile",
        index_path: "v1/feature-profile/sdwan",
        get_path: "v1/feature-profile/sdwan",
        post_path: "v1/feature-profile/sdwan",
        mutate_path: "v1/feature-profile/sdwan",
        id_field: "profileId",
        name_field: "profileName",
        store_dir: "feature_profiles/sdwan",
        min_version: Some("20.8"),
        skip_cmp_fields: &["createdOn", "createdBy", "lastUpdatedBy", "lastUpdatedOn"],
        post_filtered_fields: NO_FIELDS,
    },
    // ── Templates ────────────────────────────────────────────────────
    CatalogEntry {
        tag: Tag::TemplateDevice,
        kind: "template_device",
        info: "device template",
        index_path: "template/device",
        get_path: "template/device/object",
        post_path: "template/device/feature",
        mutate_path: "template/device",
        id_field: "templateId",
        name_field: "templateName",
        store_dir: "device_templates",
        min_version: None,
        skip_cmp_fields: DEVICE_TEMPLATE_SKIP_CMP,
        post_filtered_fields: &["feature"],
    },
    CatalogEntry {
        tag: Tag::TemplateFeature,
        kind: "template_feature",
        info: "feature template",
        index_path: "template/feature",
        get_path: "template/feature/object",
        post_path: "template/feature",
        mutate_path: "template/feature",
        id_field: "templateId",
        name_field: "templateName",
        store_dir: "feature_templates",
        min_version: None,
        skip_cmp_fields: FEATURE_TEMPLATE_SKIP_CMP,
        post_filtered_fields: NO_FIELDS,
    },
    // ── Policy templates ─────────────────────────────────────────────
    policy_template(
        Tag::PolicyVsmart,
        "policy_vsmart",
        "VSMART policy",
        "template/policy/vsmart",
        "template/policy/vsmart/definition",
        "policy_templates/vsmart",
        None,
        VSMART_POLICY_SKIP_CMP,
    ),
    policy_template(
        Tag::PolicyVedge,
        "policy_vedge",
        "edge policy",
        "template/policy/vedge",
        "template/policy/vedge/definition",
        "policy_templates/vedge",
        None,
        NO_FIELDS,
    ),
    policy_template(
        Tag::PolicySecurity,
        "policy_security",
        "security policy",
        "template/policy/security",
        "template/policy/security/definition",
        "policy_templates/security",
        None,
        NO_FIELDS,
    ),
    policy_template(
        Tag::PolicyVoice,
        "policy_voice",
        "voice policy",
        "template/policy/voice",
        "template/policy/voice/definition",
        "policy_templates/voice",
        Some("20.1"),
        NO_FIELDS,
    ),
    policy_template(
        Tag::PolicyCustomapp,
        "policy_customapp",
        "custom application policy",
        "template/policy/customapp",
        "template/policy/customapp",
        "policy_templates/customapp",
        Some("20.1"),
        NO_FIELDS,
    ),
    // ── Policy definitions ───────────────────────────────────────────
    policy_definition(
        "policy_definition.data",
        "data policy definition",
        "template/policy/definition/data",
        "policy_definitions/data",
        None,
    ),
    policy_definition(
        "policy_definition.mesh",
        "mesh policy definition",
        "template/policy/definition/mesh",
        "policy_definitions/mesh",
        None,
    ),
    policy_definition(
        "policy_definition.rewrite_rule",
        "rewrite-rule policy definition",
        "template/policy/definition/rewriterule",
        "policy_definitions/rewrite_rule",
        None,
    ),
    policy_definition(
        "policy_definition.aclv6",
        "ACLv6 policy definition",
        "template/policy/definition/aclv6",
        "policy_definitions/aclv6",
        None,
    ),
    policy_definition(
        "policy_definition.qos_map",
        "QOS-map policy definition",
        "template/policy/definition/qosmap",
        "policy_definitions/qos_map",
        None,
    ),
    policy_definition(
        "policy_definition.url_filtering",
        "URL-filtering policy definition",
        "template/policy/definition/urlfiltering",
        "policy_definitions/url_filtering",
        None,
    ),
    policy_definition(
        "policy_definition.zone_based_fw",
        "zone-based FW policy definition",
        "template/policy/definition/zonebasedfw",
        "policy_definitions/zone_based_fw",
        None,
    ),
    policy_definition(
        "policy_definition.app_route",
        "appRoute policy definition",
        "template/policy/definition/approute",
        "policy_definitions/app_route",
        None,
    ),
    policy_definition(
        "policy_definition.vpn_membership",
        "VPN membership policy definition",
        "template/policy/definition/vpnmembershipgroup",
        "policy_definitions/vpn_membership",
        None,
    ),
    policy_definition(
        "policy_definition.acl",
        "ACL policy definition",
        "template/policy/definition/acl",
        "policy_definitions/acl",
        None,
    ),
    policy_definition(
        "policy_definition.hub_and_spoke",
        "Hub-and-spoke policy definition",
        "template/policy/definition/hubandspoke",
        "policy_definitions/hub_and_spoke",
        None,
    ),
    policy_definition(
        "policy_definition.vedge_route",
        "edge-route policy definition",
        "template/policy/definition/vedgeroute",
        "policy_definitions/vedge_route",
        None,
    ),
    policy_definition(
        "policy_definition.intrusion_prevention",
        "IPS policy definition",
        "template/policy/definition/intrusionprevention",
        "policy_definitions/intrusion_prevention",
        None,
    ),
    policy_definition(
        "policy_definition.control",
        "control policy definition",
        "template/policy/definition/control",
        "policy_definitions/control",
        None,
    ),
    policy_definition(
        "policy_definition.dns_security",
        "dns-security policy definition",
        "template/policy/definition/dnssecurity",
        "policy_definitions/dns_security",
        None,
    ),
    policy_definition(
        "policy_definition.cflowd",
        "cflowd policy definition",
        "template/policy/definition/cflowd",
        "policy_definitions/cflowd",
        None,
    ),
    policy_definition(
        "policy_definition.amp",
        "AMP policy definition",
        "template/policy/definition/advancedMalwareProtection",
        "policy_definitions/amp",
        None,
    ),
    policy_definition(
        "policy_definition.device_access",
        "device access policy definition",
        "template/policy/definition/deviceaccesspolicy",
        "policy_definitions/device_access",
        None,
    ),
    policy_definition(
        "policy_definition.device_access_v6",
        "IPv6 device access policy definition",
        "template/policy/definition/deviceaccesspolicyv6",
        "policy_definitions/device_access_v6",
        None,
    ),
    policy_definition(
        "policy_definition.dial_peer",
        "dial-peer policy definition",
        "template/policy/definition/dialpeer",
        "policy_definitions/dial_peer",
        Some("20.1"),
    ),
    policy_definition(
        "policy_definition.phone_profile",
        "phone profile policy definition",
        "template/policy/definition/srstphoneprofile",
        "policy_definitions/phone_profile",
        Some("20.1"),
    ),
    policy_definition(
        "policy_definition.fxo_port",
        "FXO port policy definition",
        "template/policy/definition/fxoport",
        "policy_definitions/fxo_port",
        Some("20.1"),
    ),
    policy_definition(
        "policy_definition.fxs_port",
        "FXS port policy definition",
        "template/policy/definition/fxsport",
        "policy_definitions/fxs_port",
        Some("20.1"),
    ),
    policy_definition(
        "policy_definition.fxs_did_port",
        "FXS-DID port policy definition",
        "template/policy/definition/fxsdidport",
        "policy_definitions/fxs_did_port",
        Some("20.1"),
    ),
    policy_definition(
        "policy_definition.ssl_decryption",
        "SSL decryption policy definition",
        "template/policy/definition/ssldecryption",
        "policy_definitions/ssl_decryption",
        Some("20.1"),
    ),
    policy_definition(
        "policy_definition.utd_profile",
        "SSL decryption UTD profile policy definition",
        "template/policy/definition/sslutdprofile",
        "policy_definitions/utd_profile",
        Some("20.1"),
    ),
    // ── Policy profiles ──────────────────────────────────────────────
    CatalogEntry {
        tag: Tag::PolicyProfile,
        kind: "policy_profile.translation",
        info: "translation profile",
        index_path: "template/policy/list/translationprofile",
        get_path: "template/policy/list/translationprofile",
        post_path: "template/policy/list/translationprofile",
        mutate_path: "template/policy/list/translationprofile",
        id_field: "listId",
        name_field: "name",
        store_dir: "policy_profiles/translation",
        min_version: Some("20.1"),
        skip_cmp_fields: POLICY_SKIP_CMP,
        post_filtered_fields: NO_FIELDS,
    },
    // ── Policy lists ─────────────────────────────────────────────────
    policy_list(
        "policy_list.vpn",
        "VPN list",
        "template/policy/list/vpn",
        "policy_lists/vpn",
        None,
    ),
    policy_list(
        "policy_list.url_white_list",
        "URL-whitelist list",
        "template/policy/list/urlwhitelist",
        "policy_lists/url_white_list",
        None,
    ),
    policy_list(
        "policy_list.url_black_list",
        "URL-blacklist list",
        "template/policy/list/urlblacklist",
        "policy_lists/url_black_list",
        None,
    ),
    policy_list(
        "policy_list.policer",
        "policer list",
        "template/policy/list/policer",
        "policy_lists/policer",
        None,
    ),
    policy_list(
        "policy_list.ips_signature",
        "IPS-signature list",
        "template/policy/list/ipssignature",
        "policy_lists/ips_signature",
        None,
    ),
    policy_list(
        "policy_list.class",
        "class list",
        "template/policy/list/class",
        "policy_lists/class",
        None,
    ),
    policy_list(
        "policy_list.umbrella_data",
        "umbrella-data list",
        "template/policy/list/umbrelladata",
        "policy_lists/umbrella_data",
        None,
    ),
    policy_list(
        "policy_list.prefix",
        "prefix list",
        "template/policy/list/prefix",
        "policy_lists/prefix",
        None,
    ),
    policy_list(
        "policy_list.site",
        "site list",
        "template/policy/list/site",
        "policy_lists/site",
        None,
    ),
    policy_list(
        "policy_list.ext_community",
        "extended-community list",
        "template/policy/list/extcommunity",
        "policy_lists/ext_community",
        None,
    ),
    policy_list(
        "policy_list.data_prefix",
        "data-prefix list",
        "template/policy/list/dataprefix",
        "policy_lists/data_prefix",
        None,
    ),
    policy_list(
        "policy_list.mirror",
        "mirror list",
        "template/policy/list/mirror",
        "policy_lists/mirror",
        None,
    ),
    policy_list(
        "policy_list.app",
        "application list",
        "template/policy/list/app",
        "policy_lists/app",
        None,
    ),
    policy_list(
        "policy_list.local_app",
        "local-application list",
        "template/policy/list/localapp",
        "policy_lists/local_app",
        None,
    ),
    policy_list(
        "policy_list.sla",
        "SLA-class list",
        "template/policy/list/sla",
        "policy_lists/sla",
        None,
    ),
    policy_list(
        "policy_list.color",
        "color list",
        "template/policy/list/color",
        "policy_lists/color",
        None,
    ),
    policy_list(
        "policy_list.zone",
        "zone list",
        "template/policy/list/zone",
        "policy_lists/zone",
        None,
    ),
    policy_list(
        "policy_list.as_path",
        "as-path list",
        "template/policy/list/aspath",
        "policy_lists/as_path",
        None,
    ),
    policy_list(
        "policy_list.tloc",
        "TLOC list",
        "template/policy/list/tloc",
        "policy_lists/tloc",
        None,
    ),
    policy_list(
        "policy_list.data_ipv6_prefix",
        "data-ipv6-prefix list",
        "template/policy/list/dataipv6prefix",
        "policy_lists/data_ipv6_prefix",
        None,
    ),
    policy_list(
        "policy_list.ipv6_prefix",
        "ipv6-prefix list",
        "template/policy/list/ipv6prefix",
        "policy_lists/ipv6_prefix",
        None,
    ),
    policy_list(
        "policy_list.local_domain",
        "local-domain list",
        "template/policy/list/localdomain",
        "policy_lists/local_domain",
        None,
    ),
    policy_list(
        "policy_list.community",
        "community list",
        "template/policy/list/community",
        "policy_lists/community",
        None,
    ),
    policy_list(
        "policy_list.umbrella_secret",
        "umbrella secret list",
        "template/policy/list/umbrellasecret",
        "policy_lists/umbrella_secret",
        None,
    ),
    policy_list(
        "policy_list.tg_api_key",
        "threat grid api key list",
        "template/policy/list/tgapikey",
        "policy_lists/tg_api_key",
        None,
    ),
    policy_list(
        "policy_list.fqdn",
        "FQDN list",
        "template/policy/list/fqdn",
        "policy_lists/fqdn",
        Some("20.1"),
    ),
    policy_list(
        "policy_list.translation_rules",
        "translation rules list",
        "template/policy/list/translationrules",
        "policy_lists/translation_rules",
        Some("20.1"),
    ),
    policy_list(
        "policy_list.supervisory_disconnect",
        "supervisory disconnect list",
        "template/policy/list/supervisorydisc",
        "policy_lists/supervisory_disconnect",
        Some("20.1"),
    ),
    policy_list(
        "policy_list.media_profile",
        "media profile list",
        "template/policy/list/mediaprofile",
        "policy_lists/media_profile",
        Some("20.1"),
    ),
];
