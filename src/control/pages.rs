use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fmt;

/// A screen the onboard display can show.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Page {
    IpAddress,
    Sensors,
    Camera,
}

impl Page {
    pub const ALL: [Page; 3] = [Page::IpAddress, Page::Sensors, Page::Camera];

    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ip_address" | "ip" => Ok(Page::IpAddress),
            "sensors" => Ok(Page::Sensors),
            "camera" | "cam_disp" => Ok(Page::Camera),
            other => Err(anyhow!(
                "unknown page '{}'; expected one of ip_address, sensors, camera",
                other
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Page::IpAddress => "ip_address",
            Page::Sensors => "sensors",
            Page::Camera => "camera",
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered, cyclic page list. Index 0 is the locked page shown until the
/// unlock hold; the cycle then runs over indices `1..len`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageSequence {
    pages: Vec<Page>,
}

impl Default for PageSequence {
    fn default() -> Self {
        Self {
            pages: Page::ALL.to_vec(),
        }
    }
}

impl PageSequence {
    pub fn new(pages: Vec<Page>) -> Result<Self> {
        if pages.len() < 2 {
            return Err(anyhow!(
                "page sequence needs a locked page and at least one cycling page (got {})",
                pages.len()
            ));
        }
        Ok(Self { pages })
    }

    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let pages = names
            .iter()
            .map(|name| Page::parse(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(pages)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn locked(&self) -> Page {
        self.pages[0]
    }

    /// Map any index into the cycling range `1..len`; out-of-range wraps to 1.
    pub fn normalize(&self, index: usize) -> usize {
        if index == 0 || index >= self.pages.len() {
            1
        } else {
            index
        }
    }

    pub fn get(&self, index: usize) -> Page {
        self.pages[self.normalize(index)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_aliases() {
        assert_eq!(Page::parse("IP_ADDRESS").unwrap(), Page::IpAddress);
        assert_eq!(Page::parse("cam_disp").unwrap(), Page::Camera);
        assert!(Page::parse("weather").is_err());
    }

    #[test]
    fn rejects_short_sequences() {
        assert!(PageSequence::new(vec![]).is_err());
        assert!(PageSequence::new(vec![Page::IpAddress]).is_err());
        assert!(PageSequence::parse(&["ip_address", "bogus"]).is_err());
    }

    #[test]
    fn normalize_wraps_into_cycle_range() {
        let seq = PageSequence::default();
        assert_eq!(seq.normalize(0), 1);
        assert_eq!(seq.normalize(1), 1);
        assert_eq!(seq.normalize(2), 2);
        assert_eq!(seq.normalize(3), 1);
        assert_eq!(seq.get(7), Page::Sensors);
        assert_eq!(seq.locked(), Page::IpAddress);
    }
}
