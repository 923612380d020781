//! The legacy forms-authentication cookie used by pre-REST download pages.

use http::HeaderMap;
use http::header::SET_COOKIE;

/// Name of the cookie `auth/legacyLogin` hands out.
pub const LEGACY_AUTH_COOKIE: &str = ".ASPXAUTH";

/// Finds the value of cookie `name` among a response's `Set-Cookie` headers.
///
/// Handles both one header per cookie and several cookies folded into one header
/// with commas. The value runs up to the next `;`. Empty values are ignored.
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|cookie| cookie.trim_start().strip_prefix(prefix.as_str()))
        .map(|rest| rest.split(';').next().unwrap_or_default().trim())
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(values: &[&str]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for v in values {
            h.append(SET_COOKIE, HeaderValue::from_str(v).unwrap());
        }
        h
    }

    #[test]
    fn finds_cookie_among_several_headers() {
        let h = headers(&[
            "ASP.NET_SessionId=zzz; path=/; HttpOnly",
            ".ASPXAUTH=ABCDEF0123; expires=Wed, 01-Jan-2031 00:00:00 GMT; path=/; secure; HttpOnly",
        ]);
        assert_eq!(
            extract_cookie(&h, LEGACY_AUTH_COOKIE).as_deref(),
            Some("ABCDEF0123")
        );
    }

    #[test]
    fn finds_cookie_in_folded_header() {
        let h = headers(&["a=1; path=/, .ASPXAUTH=tok; path=/; HttpOnly, b=2"]);
        assert_eq!(extract_cookie(&h, LEGACY_AUTH_COOKIE).as_deref(), Some("tok"));
    }

    #[test]
    fn value_without_attributes() {
        let h = headers(&[".ASPXAUTH=bare"]);
        assert_eq!(extract_cookie(&h, LEGACY_AUTH_COOKIE).as_deref(), Some("bare"));
    }

    #[test]
    fn does_not_match_similar_names_or_empty_values() {
        let h = headers(&["X.ASPXAUTH=nope; path=/", ".ASPXAUTH=; path=/"]);
        assert_eq!(extract_cookie(&h, LEGACY_AUTH_COOKIE), None);
        assert_eq!(extract_cookie(&HeaderMap::new(), LEGACY_AUTH_COOKIE), None);
    }
}
