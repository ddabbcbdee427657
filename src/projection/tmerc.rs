//! Transverse Mercator on an ellipsoid.
//!
//! Uses the Krüger series to sixth order in the third flattening, which is
//! accurate to well below a millimetre within a few thousand kilometres of the
//! central meridian. That covers UTM zones and state plane systems.

use std::f64::consts::FRAC_PI_2;


#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// semi-major axis in metres
    pub a: f64,
    /// inverse flattening
    pub inv_f: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        inv_f: 298.257_223_563,
    };

    pub const GRS80: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        inv_f: 298.257_222_101,
    };

    pub fn flattening(&self) -> f64 {
        1.0 / self.inv_f
    }

    pub fn eccentricity(&self) -> f64 {
        let f = self.flattening();
        (f * (2.0 - f)).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransverseMercator {
    /// central meridian, radians
    lon0: f64,
    k0: f64,
    false_easting: f64,
    false_northing: f64,
    e: f64,
    /// rectifying radius
    big_a: f64,
    alpha: [f64; 6],
    beta: [f64; 6],
    /// scaled meridian arc at the latitude of origin
    m0: f64,
}

impl TransverseMercator {
    pub fn new(
        ellipsoid: Ellipsoid,
        lat0_deg: f64,
        lon0_deg: f64,
        k0: f64,
        false_easting: f64,
        false_northing: f64,
    ) -> Self {
        let f = ellipsoid.flattening();
        let n = f / (2.0 - f);
        let n2 = n * n;
        let n3 = n2 * n;
        let n4 = n3 * n;
        let n5 = n4 * n;
        let n6 = n5 * n;

        let big_a = ellipsoid.a / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0 + n6 / 256.0);

        let alpha = [
            n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0 + 41.0 * n4 / 180.0 - 127.0 * n5 / 288.0
                + 7891.0 * n6 / 37800.0,
            13.0 * n2 / 48.0 - 3.0 * n3 / 5.0 + 557.0 * n4 / 1440.0 + 281.0 * n5 / 630.0
                - 1983433.0 * n6 / 1935360.0,
            61.0 * n3 / 240.0 - 103.0 * n4 / 140.0 + 15061.0 * n5 / 26880.0 + 167603.0 * n6 / 181440.0,
            49561.0 * n4 / 161280.0 - 179.0 * n5 / 168.0 + 6601661.0 * n6 / 7257600.0,
            34729.0 * n5 / 80640.0 - 3418889.0 * n6 / 1995840.0,
            212378941.0 * n6 / 319334400.0,
        ];

        let beta = [
            n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0 - n4 / 360.0 - 81.0 * n5 / 512.0
                + 96199.0 * n6 / 604800.0,
            n2 / 48.0 + n3 / 15.0 - 437.0 * n4 / 1440.0 + 46.0 * n5 / 105.0 - 1118711.0 * n6 / 3870720.0,
            17.0 * n3 / 480.0 - 37.0 * n4 / 840.0 - 209.0 * n5 / 4480.0 + 5569.0 * n6 / 90720.0,
            4397.0 * n4 / 161280.0 - 11.0 * n5 / 504.0 - 830251.0 * n6 / 7257600.0,
            4583.0 * n5 / 161280.0 - 108847.0 * n6 / 3991680.0,
            20648693.0 * n6 / 638668800.0,
        ];

        let mut tm = TransverseMercator {
            lon0: lon0_deg.to_radians(),
            k0,
            false_easting,
            false_northing,
            e: ellipsoid.eccentricity(),
            big_a,
            alpha,
            beta,
            m0: 0.0,
        };

        let (xi0, _) = tm.gauss_krueger(lat0_deg.to_radians(), 0.0);
        tm.m0 = k0 * big_a * xi0;
        tm
    }

    /// Geodetic degrees to projected metres.
    pub fn forward(&self, lat_deg: f64, lon_deg: f64) -> (f64, f64) {
        let lambda = lon_deg.to_radians() - self.lon0;
        let (xi, eta) = self.gauss_krueger(lat_deg.to_radians(), lambda);

        let x = self.false_easting + self.k0 * self.big_a * eta;
        let y = self.false_northing + self.k0 * self.big_a * xi - self.m0;
        (x, y)
    }

    /// Projected metres back to geodetic degrees.
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let xi = (y - self.false_northing + self.m0) / (self.k0 * self.big_a);
        let eta = (x - self.false_easting) / (self.k0 * self.big_a);

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, beta) in self.beta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi_p -= beta * (k * xi).sin() * (k * eta).cosh();
            eta_p -= beta * (k * xi).cos() * (k * eta).sinh();
        }

        let tau_p = xi_p.sin() / (eta_p.sinh().powi(2) + xi_p.cos().powi(2)).sqrt();
        let lambda = eta_p.sinh().atan2(xi_p.cos());
        let tau = self.tau_from_conformal(tau_p);

        (tau.atan().to_degrees(), (lambda + self.lon0).to_degrees())
    }

    /// `(xi, eta)` on the unit sphere, before scaling by `k0 * A`.
    fn gauss_krueger(&self, phi: f64, lambda: f64) -> (f64, f64) {
        if (phi.abs() - FRAC_PI_2).abs() < 1e-15 {
            return (phi.signum() * FRAC_PI_2, 0.0);
        }

        let tau_p = self.conformal_tau(phi.tan());
        let xi_p = tau_p.atan2(lambda.cos());
        let eta_p = (lambda.sin() / (tau_p * tau_p + lambda.cos().powi(2)).sqrt()).asinh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, alpha) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi += alpha * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += alpha * (k * xi_p).cos() * (k * eta_p).sinh();
        }

        (xi, eta)
    }

    /// tan of the conformal latitude for `tau = tan(phi)`.
    fn conformal_tau(&self, tau: f64) -> f64 {
        let e = self.e;
        let sigma = (e * (e * tau / (1.0 + tau * tau).sqrt()).atanh()).sinh();
        tau * (1.0 + sigma * sigma).sqrt() - sigma * (1.0 + tau * tau).sqrt()
    }

    /// Newton iteration solving `conformal_tau(tau) = tau_p`.
    fn tau_from_conformal(&self, tau_p: f64) -> f64 {
        let e2m = 1.0 - self.e * self.e;
        let mut tau = tau_p / e2m;

        for _ in 0..10 {
            let tau_p_i = self.conformal_tau(tau);
            let derivative = e2m * (1.0 + tau_p_i * tau_p_i).sqrt() * (1.0 + tau * tau).sqrt()
                / (1.0 + e2m * tau * tau);
            let step = (tau_p - tau_p_i) / derivative;
            tau += step;
            if step.abs() <= 1e-14 * tau.abs().max(1.0) {
                break;
            }
        }

        tau
    }
}
