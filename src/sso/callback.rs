use url::Url;

/// Query parameters the provider appends to the redirect URI
const CALLBACK_PARAMS: &[&str] = &[
    "code",
    "state",
    "session_state",
    "iss",
    "error",
    "error_description",
    "error_uri",
];

/// Base used to parse relative locations
const RELATIVE_BASE: &str = "http://relative.invalid";

/// Parameters of an authorization-code redirect callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Recognize a callback URL: `code` and `state` present, or an `error`
    #[must_use]
    pub fn from_url(location: &str) -> Option<Self> {
        let (url, _) = parse_location(location)?;

        let mut params = Self {
            code: None,
            state: None,
            error: None,
            error_description: None,
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                "error_description" => params.error_description = Some(value.into_owned()),
                _ => {}
            }
        }

        let is_success = params.code.is_some() && params.state.is_some();
        if is_success || params.error.is_some() {
            Some(params)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Remove callback parameters from `location`, keeping every other parameter
#[must_use]
pub fn clean_url(location: &str) -> String {
    let Some((mut url, relative)) = parse_location(location) else {
        return location.to_string();
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !CALLBACK_PARAMS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    url.set_query(None);
    if !kept.is_empty() {
        url.query_pairs_mut().extend_pairs(kept);
    }

    if relative {
        let mut out = url.path().to_string();
        if let Some(query) = url.query() {
            out.push('?');
            out.push_str(query);
        }
        if let Some(fragment) = url.fragment() {
            out.push('#');
            out.push_str(fragment);
        }
        out
    } else {
        url.to_string()
    }
}

fn parse_location(location: &str) -> Option<(Url, bool)> {
    match Url::parse(location) {
        Ok(url) => Some((url, false)),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(RELATIVE_BASE)
            .and_then(|base| base.join(location))
            .ok()
            .map(|url| (url, true)),
        Err(e) => {
            log::debug!("Unparseable location '{location}': {e}");
            None
        }
    }
}
