use std::fmt;

// set up enums and structs
/// Scan location of one measurement within a visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Dst,
    Mid,
    Prx,
}

impl Role {
    /// Roles in the order they appear in a manifest triplet.
    pub const ALL: [Role; 3] = [Role::Dst, Role::Mid, Role::Prx];

    pub fn to_usize(&self) -> usize {
        match self {
            Role::Dst => 0,
            Role::Mid => 1,
            Role::Prx => 2,
        }
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Dst => "DST",
            Role::Mid => "MID",
            Role::Prx => "PRX",
        }
    }
}
impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three measurement ids of one visit, bound to `DST`, `MID`, `PRX`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTriplet {
    ids: [String; 3],
}
impl ImageTriplet {
    pub fn new(ids: [String; 3]) -> Self {
        Self { ids }
    }

    /// Builds a triplet from a slice holding exactly three ids.
    pub fn from_slice<S: AsRef<str>>(ids: &[S]) -> Option<Self> {
        match ids {
            [dst, mid, prx] => Some(Self::new([
                dst.as_ref().to_owned(),
                mid.as_ref().to_owned(),
                prx.as_ref().to_owned(),
            ])),
            _ => None,
        }
    }

    pub fn get(&self, role: Role) -> &str {
        &self.ids[role.to_usize()]
    }
}

/// Identity of a manifest record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub study_id: String,
    pub sample_id: String,
}
impl RecordKey {
    pub fn new(study_id: impl Into<String>, sample_id: impl Into<String>) -> Self {
        Self {
            study_id: study_id.into(),
            sample_id: sample_id.into(),
        }
    }
}
impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.study_id, self.sample_id)
    }
}
