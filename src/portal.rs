// 🧭 Portal configuration - one table for every role
//
// Each role portal differs only in its label, theme color and navigation
// items, so they are all described here as data. Every portal ends with
// the shared account settings entries.

use crate::errors::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Owner,
    Registrar,
    Accounting,
    Student,
    Teacher,
    Parent,
    Guidance,
    Librarian,
    Clinic,
    Canteen,
}

impl Role {
    pub const ALL: [Role; 10] = [
        Role::Owner,
        Role::Registrar,
        Role::Accounting,
        Role::Student,
        Role::Teacher,
        Role::Parent,
        Role::Guidance,
        Role::Librarian,
        Role::Clinic,
        Role::Canteen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Registrar => "registrar",
            Role::Accounting => "accounting",
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Parent => "parent",
            Role::Guidance => "guidance",
            Role::Librarian => "librarian",
            Role::Clinic => "clinic",
            Role::Canteen => "canteen",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| LedgerError::UnknownRole(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavItem {
    pub label: String,
    pub route: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalConfig {
    pub role: Role,
    pub label: String,
    pub theme: String,
    pub navigation: Vec<NavItem>,
}

struct PortalSpec {
    role: Role,
    label: &'static str,
    theme: &'static str,
    nav: &'static [(&'static str, &'static str)],
}

const SETTINGS_NAV: &[(&str, &str)] = &[
    ("Profile", "settings/profile"),
    ("Password", "settings/password"),
    ("Two-Factor Auth", "settings/two-factor"),
    ("Appearance", "settings/appearance"),
];

const PORTALS: &[PortalSpec] = &[
    PortalSpec {
        role: Role::Owner,
        label: "Owner Portal",
        theme: "indigo",
        nav: &[
            ("Dashboard", "dashboard"),
            ("Users", "users"),
            ("Reports", "reports"),
            ("Announcements", "announcements"),
            ("Audit Logs", "audit-logs"),
        ],
    },
    PortalSpec {
        role: Role::Registrar,
        label: "Registrar Portal",
        theme: "blue",
        nav: &[
            ("Dashboard", "dashboard"),
            ("Students", "students"),
            ("Enrollment", "enrollment"),
            ("Clearances", "clearances"),
            ("Classes", "classes"),
            ("Documents", "documents"),
        ],
    },
    PortalSpec {
        role: Role::Accounting,
        label: "Accounting Portal",
        theme: "emerald",
        nav: &[
            ("Dashboard", "dashboard"),
            ("Student Fees", "student-fees"),
            ("Fee Items", "fee-items"),
            ("Payments", "payments"),
            ("Grants", "grants"),
            ("Reports", "reports"),
        ],
    },
    PortalSpec {
        role: Role::Student,
        label: "Student Portal",
        theme: "sky",
        nav: &[
            ("Dashboard", "dashboard"),
            ("Enrollment", "enrollment"),
            ("My Fees", "fees"),
            ("Grades", "grades"),
            ("Schedule", "schedule"),
        ],
    },
    PortalSpec {
        role: Role::Teacher,
        label: "Teacher Portal",
        theme: "violet",
        nav: &[
            ("Dashboard", "dashboard"),
            ("My Classes", "classes"),
            ("Grades", "grades"),
            ("Attendance", "attendance"),
            ("Schedule", "schedule"),
        ],
    },
    PortalSpec {
        role: Role::Parent,
        label: "Parent Portal",
        theme: "amber",
        nav: &[
            ("Dashboard", "dashboard"),
            ("Children", "children"),
            ("Fees", "fees"),
            ("Grades", "grades"),
            ("Announcements", "announcements"),
        ],
    },
    PortalSpec {
        role: Role::Guidance,
        label: "Guidance Portal",
        theme: "teal",
        nav: &[
            ("Dashboard", "dashboard"),
            ("Students", "students"),
            ("Counseling Records", "records"),
            ("Scholarships", "scholarships"),
        ],
    },
    PortalSpec {
        role: Role::Librarian,
        label: "Library Portal",
        theme: "orange",
        nav: &[
            ("Dashboard", "dashboard"),
            ("Books", "books"),
            ("Borrowing", "borrowing"),
            ("Overdue", "overdue"),
        ],
    },
    PortalSpec {
        role: Role::Clinic,
        label: "Clinic Portal",
        theme: "rose",
        nav: &[
            ("Dashboard", "dashboard"),
            ("Visits", "visits"),
            ("Health Records", "health-records"),
            ("Medicine Inventory", "inventory"),
        ],
    },
    PortalSpec {
        role: Role::Canteen,
        label: "Canteen Portal",
        theme: "lime",
        nav: &[
            ("Dashboard", "dashboard"),
            ("Menu", "menu"),
            ("Orders", "orders"),
            ("Sales", "sales"),
        ],
    },
];

/// Portal layout for `role`; routes are prefixed with the role name
pub fn portal_for(role: Role) -> PortalConfig {
    let layout = PORTALS
        .iter()
        .find(|layout| layout.role == role)
        .unwrap_or(&PORTALS[0]);

    let navigation = layout
        .nav
        .iter()
        .chain(SETTINGS_NAV.iter())
        .map(|(label, route)| NavItem {
            label: label.to_string(),
            route: format!("/{}/{}", role.as_str(), route),
        })
        .collect();

    PortalConfig {
        role,
        label: layout.label.to_string(),
        theme: layout.theme.to_string(),
        navigation,
    }
}

pub fn all_portals() -> Vec<PortalConfig> {
    Role::ALL.into_iter().map(portal_for).collect()
}
